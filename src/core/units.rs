//! Amount formatting

/// Decimals of the native currency on EVM chains.
pub const ETHER_DECIMALS: u32 = 18;

/// Format a base-unit amount as a decimal string, trimming trailing zeros.
pub fn format_units(amount: u128, decimals: u32) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let base = 10u128.pow(decimals);
    let whole = amount / base;
    let frac = amount % base;
    if frac == 0 {
        return format!("{}.0", whole);
    }
    let frac = format!("{:0width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

/// Wei to ether.
pub fn format_ether(wei: u128) -> String {
    format_units(wei, ETHER_DECIMALS)
}
