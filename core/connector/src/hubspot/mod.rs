//! HubSpot CRM v3 destination for crmsync.

pub mod client;
pub mod provider;

pub use client::HubSpotClient;
pub use provider::{HubSpotConfig, HubSpotDestination};
