//! Common types for multi-link device coordination.
//!
//! This crate provides type-safe representations of the identifiers
//! shared by every layer of the multi-link coordinator:
//!
//! - [`MacAddress`]: 48-bit station, link and MLD addresses
//! - [`LinkId`]: 802.11be link identifier (4-bit field, 0..=14)
//! - [`MldId`]: identifier of one multi-link device context
//! - [`LinkKey`]: registry key naming one link inside one MLD

mod link;
mod mac;

pub use link::{LinkId, LinkKey, MldId};
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid link ID: {0} (must be 0-14)")]
    InvalidLinkId(u8),

    #[error("invalid link key format: {0}")]
    InvalidLinkKey(String),
}
