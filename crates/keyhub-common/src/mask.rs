/// Masks a plaintext key for display: first 6 + "…" + last 3; `len<=8` -> `***`.
///
/// Spec §3 "Mask rule for display". Never used on the storage path — only
/// when rendering a key back to an operator.
pub fn mask_key(plain: &str) -> String {
    let len = plain.chars().count();
    if len <= 8 {
        return "***".to_string();
    }
    let chars: Vec<char> = plain.chars().collect();
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[len - 3..].iter().collect();
    format!("{head}…{tail}")
}

#[cfg(test)]
mod tests {
    use super::mask_key;

    #[test]
    fn short_keys_are_fully_masked() {
        assert_eq!(mask_key("abcd1234"), "***");
        assert_eq!(mask_key(""), "***");
    }

    #[test]
    fn long_keys_show_head_and_tail() {
        assert_eq!(mask_key("sk-ant-abcdefghijklmnop"), "sk-ant…nop");
    }
}
