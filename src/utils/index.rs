/// Hex encode bytes with a `0x` prefix.
pub fn format_hash(bytes: &[u8]) -> String {
	format!("0x{}", hex::encode(bytes))
}
