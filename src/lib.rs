//! Workbook cache and file-watch reconciliation for the NOC contact list.
//!
//! The UI reads group addresses from `groups.xlsx` and contacts from
//! `contacts.xlsx`. [`excel::ExcelManager`] keeps both cached, watches the
//! files, and pushes a fresh snapshot whenever their content changes.

pub mod config;
pub mod excel;
pub mod logging;
