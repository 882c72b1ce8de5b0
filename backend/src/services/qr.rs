use rand::distr::Alphanumeric;
use rand::Rng;

pub const QR_CODE_LEN: usize = 12;

/// Random code printed on a machine's QR sticker.
pub fn generate_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(QR_CODE_LEN)
        .map(char::from)
        .collect()
}

/// URL encoded into the sticker. Scanning it lands on `/qr/:code`, which
/// redirects to the public report form.
pub fn code_url(public_url: &str, code: &str) -> String {
    format!("{public_url}/qr/{code}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_alphanumeric_and_distinct() {
        let a = generate_code();
        let b = generate_code();
        assert_eq!(a.len(), QR_CODE_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn code_url_joins_public_url() {
        assert_eq!(
            code_url("https://pinpoint.example.com", "abc123"),
            "https://pinpoint.example.com/qr/abc123"
        );
    }
}
