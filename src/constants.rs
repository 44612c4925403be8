/// Solana token mint addresses shared by the classifier and the execution engine.
pub mod mints {
    /// Wrapped SOL (native SOL wrapped as SPL token)
    pub const SOL: &str = "So11111111111111111111111111111111111111112";
    /// USDC (Circle USD Coin)
    pub const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
    /// USDT (Tether USD)
    pub const USDT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";
}

/// Decimals of the native coin
pub const SOL_DECIMALS: u8 = 9;

/// Largest scale a `Decimal` can carry; mints declaring more are not handled
pub const MAX_DECIMALS: u8 = 28;

/// Lamports per SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Default base-asset allow-list used when classifying acquisitions
pub fn default_base_mints() -> Vec<String> {
    vec![
        mints::SOL.to_string(),
        mints::USDC.to_string(),
        mints::USDT.to_string(),
    ]
}
