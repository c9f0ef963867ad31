//! # BIDS QC Common Library
//!
//! Shared code for the structural QC commands:
//! - Data model (candidate items, review records, processing results)
//! - Dataset scanning and results-directory layout
//! - Slice artifact generation
//! - Review ledger and processing-result tables
//! - Selection gate and batch work-lists
//! - Configuration loading and logging setup
//! - HTML escaping shared by the server and the report

pub mod artifacts;
pub mod config;
pub mod error;
pub mod gate;
pub mod html;
pub mod layout;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod natural;
pub mod results;
pub mod scanner;
pub mod source;
pub mod table;
pub mod time;
pub mod worklist;

pub use error::{Error, Result};
pub use model::{CandidateItem, ItemKey, Phase, ProcessingResult, Rating, ReviewRecord, Stage};
