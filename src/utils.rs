use rand::Rng;

use crate::prelude::*;

pub const CURRENCY: &str = "UAH";

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const CODE_LEN: usize = 8;

pub fn format_date(date: DateTime) -> String {
  date.format("%d.%m.%Y %H:%M").to_string()
}

/// Renders minor units as `1 234.50 UAH` style text.
pub fn format_money(amount: i64) -> String {
  let sign = if amount < 0 { "-" } else { "" };
  let abs = amount.unsigned_abs();
  format!("{sign}{}.{:02} {CURRENCY}", abs / 100, abs % 100)
}

/// Parses user input like `150`, `99.5` or `99,50` into minor units.
///
/// Signs, exponents, more than two decimals and zero are rejected.
pub fn parse_amount(input: &str) -> Result<i64> {
  let text = input.trim().replace(',', ".");
  let (whole, frac) = text.split_once('.').unwrap_or((text.as_str(), ""));

  let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
  if (whole.is_empty() && frac.is_empty())
    || !digits(whole)
    || !digits(frac)
    || frac.len() > 2
  {
    return Err(Error::InvalidAmount);
  }

  let whole: i64 = if whole.is_empty() {
    0
  } else {
    whole.parse().map_err(|_| Error::InvalidAmount)?
  };
  let cents: i64 = match frac.len() {
    0 => 0,
    1 => frac.parse::<i64>().map_err(|_| Error::InvalidAmount)? * 10,
    _ => frac.parse().map_err(|_| Error::InvalidAmount)?,
  };

  let amount = whole
    .checked_mul(100)
    .and_then(|v| v.checked_add(cents))
    .ok_or(Error::InvalidAmount)?;

  if amount <= 0 {
    return Err(Error::InvalidAmount);
  }
  Ok(amount)
}

pub fn referral_code() -> String {
  let mut rng = rand::thread_rng();
  (0..CODE_LEN)
    .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
    .collect()
}

/// Uppercases and validates a code typed or passed via deep link.
/// Anything that cannot be a code yields `None`.
pub fn normalize_code(input: &str) -> Option<String> {
  let code = input.trim().to_ascii_uppercase();
  let valid = code.len() == CODE_LEN
    && code.bytes().all(|b| CODE_ALPHABET.contains(&b));
  valid.then_some(code)
}

/// `380 (99) 123-45-67` and `+380991234567` both become `+380991234567`.
pub fn normalize_phone(input: &str) -> String {
  let digits: String = input.chars().filter(char::is_ascii_digit).collect();
  format!("+{digits}")
}

/// Hides the middle of a phone number for third parties.
pub fn mask_phone(phone: &str) -> String {
  let chars: Vec<char> = phone.chars().collect();
  if chars.len() <= 7 {
    return "***".into();
  }
  let head: String = chars[..5].iter().collect();
  let tail: String = chars[chars.len() - 2..].iter().collect();
  format!("{head}***{tail}")
}

/// Maximum message length for Telegram Bot API (4096 characters).
/// We use a slightly smaller limit to account for potential HTML entity expansion.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4000;

/// Splits a long message into chunks that fit within Telegram's message limit.
/// Splits only at newline boundaries, so HTML tags opened on a line stay closed.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
  let max_len =
    if max_len == 0 { TELEGRAM_MAX_MESSAGE_LENGTH } else { max_len };

  if text.len() <= max_len {
    return vec![text.to_string()];
  }

  let mut chunks = Vec::new();
  let mut current = String::new();

  for line in text.lines() {
    if !current.is_empty() && current.len() + line.len() + 1 > max_len {
      chunks.push(std::mem::take(&mut current));
    }
    if !current.is_empty() {
      current.push('\n');
    }
    current.push_str(line);
  }

  if !current.is_empty() {
    chunks.push(current);
  }

  chunks
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_amount() {
    assert_eq!(parse_amount("150").unwrap(), 15_000);
    assert_eq!(parse_amount(" 99.5 ").unwrap(), 9_950);
    assert_eq!(parse_amount("99,05").unwrap(), 9_905);
    assert_eq!(parse_amount(".5").unwrap(), 50);
    assert_eq!(parse_amount("12.").unwrap(), 1_200);
  }

  #[test]
  fn test_parse_amount_rejects() {
    for input in
      ["", ".", "0", "0.00", "-5", "+5", "abc", "1e3", "NaN", "inf", "1.234"]
    {
      assert!(
        matches!(parse_amount(input), Err(Error::InvalidAmount)),
        "{input:?} should be rejected"
      );
    }
    assert!(parse_amount("99999999999999999999").is_err());
  }

  #[test]
  fn test_format_money() {
    assert_eq!(format_money(10_000), "100.00 UAH");
    assert_eq!(format_money(5), "0.05 UAH");
    assert_eq!(format_money(-2_550), "-25.50 UAH");
  }

  #[test]
  fn test_referral_code_shape() {
    for _ in 0..100 {
      let code = referral_code();
      assert_eq!(code.len(), CODE_LEN);
      assert_eq!(normalize_code(&code), Some(code));
    }
  }

  #[test]
  fn test_normalize_code() {
    assert_eq!(normalize_code(" ab12cd34 "), Some("AB12CD34".into()));
    assert_eq!(normalize_code("AB12CD3"), None);
    assert_eq!(normalize_code("AB12CD3!"), None);
    assert_eq!(normalize_code(""), None);
  }

  #[test]
  fn test_phones() {
    assert_eq!(normalize_phone("380 (99) 123-45-67"), "+380991234567");
    assert_eq!(normalize_phone("+380991234567"), "+380991234567");
    assert_eq!(mask_phone("+380991234567"), "+3809***67");
    assert_eq!(mask_phone("+123"), "***");
  }

  #[test]
  fn test_chunk_message() {
    let text = "aaaa\nbbbb\ncccc";
    assert_eq!(chunk_message(text, 9), vec!["aaaa\nbbbb", "cccc"]);
    assert_eq!(chunk_message("short", 0), vec!["short"]);
  }
}
