//! Per-payer point balances over an append-only grant ledger
//!
//! Points are granted by payers and spent from the global pool, oldest grant first. A spend
//! either covers its whole amount or changes nothing.
//!
//! - [`domain`] holds the ledger records and the FIFO [`domain::allocator`].
//! - [`ports::ledger::LedgerPort`] is the store seam, implemented by
//!   [`adapters::database::sqlite::SqliteLedger`] and [`adapters::database::memory::MemoryLedger`].
//! - [`commands::DomainLogic`] exposes grant, spend, balances and ledger listing as
//!   [`tower::Service`]s.

pub mod adapters;
pub mod commands;
pub mod config;
pub mod domain;
pub mod ports;
