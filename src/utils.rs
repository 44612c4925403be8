use crate::constants::MAX_DECIMALS;
use rust_decimal::prelude::*;

/// Convert a raw integer amount into UI units for a mint with `decimals`,
/// `None` when the mint declares more decimals than a `Decimal` can hold
pub fn raw_to_ui(raw: u64, decimals: u8) -> Option<Decimal> {
    Decimal::try_from_i128_with_scale(raw as i128, decimals as u32).ok()
}

/// Convert a UI amount into the raw integer amount, truncating dust below one unit
pub fn ui_to_raw(amount: Decimal, decimals: u8) -> Option<u64> {
    if amount.is_sign_negative() || decimals > MAX_DECIMALS {
        return None;
    }
    let scale = Decimal::from_i128_with_scale(10i128.pow(decimals as u32), 0);
    amount.checked_mul(scale)?.trunc().to_u64()
}

/// Lamports (signed delta) to SOL
pub fn lamports_to_sol(lamports: i64) -> Decimal {
    Decimal::new(lamports, crate::constants::SOL_DECIMALS as u32)
}

/// Shorten an address for log lines: `7xKX...gAsU`
pub fn short_address(address: &str) -> String {
    if address.len() <= 8 {
        return address.to_string();
    }
    format!("{}...{}", &address[..4], &address[address.len() - 4..])
}
