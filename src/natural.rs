//! Numeric-aware string ordering for display labels ("Table 2" < "Table 10").

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

enum Chunk {
    Digits(String),
    Text(String),
}

fn next_chunk(chars: &mut Peekable<Chars<'_>>) -> Option<Chunk> {
    let first = *chars.peek()?;
    let digits = first.is_ascii_digit();
    let mut buf = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() != digits {
            break;
        }
        buf.push(c);
        chars.next();
    }
    Some(if digits { Chunk::Digits(buf) } else { Chunk::Text(buf) })
}

/// Compare two digit runs by numeric value without overflowing.
fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
}

/// Natural ordering: digit runs compare by value, text runs case-insensitively.
/// Ties fall back to a plain byte comparison so the order is total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        let ord = match (next_chunk(&mut left), next_chunk(&mut right)) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(Chunk::Digits(x)), Some(Chunk::Digits(y))) => cmp_digits(&x, &y),
            (Some(Chunk::Digits(_)), Some(Chunk::Text(_))) => Ordering::Less,
            (Some(Chunk::Text(_)), Some(Chunk::Digits(_))) => Ordering::Greater,
            (Some(Chunk::Text(x)), Some(Chunk::Text(y))) => x.to_lowercase().cmp(&y.to_lowercase()),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut v: Vec<&str>) -> Vec<&str> {
        v.sort_by(|a, b| natural_cmp(a, b));
        v
    }

    #[test]
    fn numbers_by_value() {
        assert_eq!(
            sorted(vec!["Table 10", "Table 2", "Table 1", "Table 21"]),
            vec!["Table 1", "Table 2", "Table 10", "Table 21"]
        );
    }

    #[test]
    fn case_insensitive_text() {
        assert_eq!(natural_cmp("patio 3", "Patio 4"), Ordering::Less);
        assert_eq!(sorted(vec!["bar", "Booth", "Arbor"]), vec!["Arbor", "bar", "Booth"]);
    }

    #[test]
    fn prefix_sorts_first() {
        assert_eq!(natural_cmp("Table", "Table 1"), Ordering::Less);
    }

    #[test]
    fn leading_zeros_and_huge_numbers() {
        assert_eq!(natural_cmp("T007", "T7"), Ordering::Less); // tie broken bytewise
        assert_eq!(
            natural_cmp("T99999999999999999999999", "T100000000000000000000000"),
            Ordering::Less
        );
    }

    #[test]
    fn total_order_on_equal_keys() {
        assert_eq!(natural_cmp("A1", "A1"), Ordering::Equal);
        assert_ne!(natural_cmp("a1", "A1"), Ordering::Equal);
    }
}
