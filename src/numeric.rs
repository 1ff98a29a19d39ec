//! Text encodings for chain-native values
//!
//! Amounts are stored as decimal strings left-padded with zeros to
//! [`PADDED_WIDTH`] characters, so that comparing two stored strings gives the
//! same answer as comparing the numbers. Every write of a price, payout,
//! balance or frozen sum and every range bound against those columns goes
//! through [`to_padded`].
//!
//! Ids are stored as plain (unpadded) decimal strings, addresses as EIP-55
//! checksummed hex.

use std::str::FromStr;

use alloy_primitives::{Address, U256};

/// Width of a padded amount string. `U256::MAX` has 78 decimal digits.
pub const PADDED_WIDTH: usize = 80;

/// Render an amount as a fixed-width, zero-padded decimal string.
pub fn to_padded(value: &U256) -> String {
    format!("{:0>width$}", value.to_string(), width = PADDED_WIDTH)
}

/// Parse a decimal string (padded or not) back into an amount.
pub fn parse_decimal(raw: &str) -> Result<U256, String> {
    if raw.is_empty() {
        return Err("empty numeric string".to_string());
    }
    if raw.len() > PADDED_WIDTH {
        return Err(format!("numeric string longer than {} characters", PADDED_WIDTH));
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("'{}' is not a decimal integer", raw));
    }

    let digits = raw.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }

    U256::from_str_radix(digits, 10).map_err(|e| format!("'{}' out of range: {}", raw, e))
}

/// Render an id as a plain decimal string.
pub fn id_to_string(id: &U256) -> String {
    id.to_string()
}

/// Render an address the way it is stored and compared.
pub fn address_to_string(address: &Address) -> String {
    address.to_checksum(None)
}

/// Parse a stored hex address.
pub fn parse_address(raw: &str) -> Result<Address, String> {
    Address::from_str(raw).map_err(|e| format!("'{}' is not an address: {}", raw, e))
}
