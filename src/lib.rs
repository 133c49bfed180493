pub mod adapter;
pub mod alphafold;
pub mod app;
pub mod biocyc;
pub mod cache;
pub mod config;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod fragment;
pub mod http;
pub mod metrics;
pub mod ncbi;
pub mod orchestrator;
pub mod output;
pub mod ratelimit;
pub mod rcsb;
pub mod runtime;
pub mod session;
pub mod store;
pub mod string_db;
pub mod uniprot;
