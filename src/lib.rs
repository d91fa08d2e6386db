//! permitsync: harvest permit/project records from a municipal dashboard
//! and forward them to a remote endpoint.
//!
//! A run logs in with a browser session, scrapes the listing rows, parses
//! each row into a [`models::ProjectRecord`], and posts the batch as JSON.

pub mod browser;
pub mod config;
pub mod delivery;
pub mod models;
pub mod scrapers;
pub mod services;
