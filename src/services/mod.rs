// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod forum;
pub mod identity;
pub mod ledger;
pub mod lifecycle;
pub mod mailbox;
pub mod playtime;
pub mod profile;
pub mod propagation;
pub mod purchase;
pub mod verification;

pub use forum::{Actor, ForumService};
pub use identity::{FirebaseVerifier, IdentityAdmin, VerifiedIdentity};
pub use ledger::Ledger;
pub use lifecycle::{DeletionReport, LifecycleService};
pub use mailbox::MailboxService;
pub use playtime::{PlaytimeHub, WaitOutcome};
pub use profile::{ProfileService, ProfileUpdate};
pub use propagation::{PropagationReport, PropagationService};
pub use purchase::PurchaseService;
pub use verification::{Notifier, VerificationService};
