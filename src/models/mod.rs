// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod balance;
pub mod catalog;
pub mod forum;
pub mod mailbox;
pub mod user;
pub mod verification;

pub use balance::{BalanceKey, Balances};
pub use catalog::{CatalogDoc, CatalogEntry, CatalogKey, Channel};
pub use forum::{AuthorRef, Comment, CommentIndexEntry, CommentPointer, Post};
pub use mailbox::{Envelope, ItemLine};
pub use user::{Provider, Tombstone, User};
pub use verification::VerificationCode;
