/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Flotilla – resource-offer scheduler
//!
//! Places a fixed number of homogeneous tasks onto resources offered by a
//! cluster manager and tracks them until every task has finished.
//!
//! ```text
//! lib.rs
//! ├── offer          – offer / demand / placement model, typed ids
//! ├── matcher/       – greedy strict-FIFO first-fit over one offer
//! ├── lifecycle      – per-task state table fed by status updates
//! ├── controller     – OfferScheduler: counters, launch cap, completion
//! ├── driver/        – Scheduler / SchedulerDriver traits
//! │   ├── recording  – command-recording driver for tests and simulation
//! │   └── local      – in-process master + agents (tokio)
//! ├── executor       – fetch → process → publish → ack pipeline
//! ├── artifact       – HTTP server for the executor binary
//! └── config/        – framework file and agent inventory (YAML)
//! ```

pub mod artifact;
pub mod config;
pub mod controller;
pub mod driver;
pub mod executor;
pub mod lifecycle;
pub mod matcher;
pub mod offer;
