//! Matching Service - rule-driven transaction matching and reconciliation
//! with an approval workflow.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
