//! Dataset Ingestion Service
//!
//! This library provides the core functionality for the dataset-ingest system,
//! which converts uploaded dataset archives into a training-ready directory
//! layout: images and labels copied into canonical folders, recorded in
//! ordered manifest list files, driven by a durable job queue.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
