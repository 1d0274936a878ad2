//! Main crate for the `clouddns_acme_responder` application.
//!
//! Answers ACME `dns-01` challenges by publishing TXT records in Google Cloud DNS,
//! waiting until every authoritative nameserver serves them, and removing them again
//! once validation is over.
//!
//! For more information, choose one of the modules below.
//! The following modules might be of interest if you want to add new functionality:
//! - [`responder`] contains the batch entry points used by ACME clients
//! - [`provider`]s are DNS hosting APIs such as Google Cloud DNS that ultimately serve records to clients
//! - [`plan`] computes the record set changes that add or remove challenge values without touching other values
//! - [`propagation`] checks that the authoritative nameservers of a zone serve the new values

#![allow(clippy::uninlined_format_args)]

pub mod change;
pub mod config;
pub mod domain;
pub mod error;
pub mod plan;
pub mod propagation;
pub mod provider;
pub mod responder;
pub mod retry;
pub mod zone;
