//! Scoring primitives shared by the matcher and the import resolver.
//! All functions are pure; scores are in [0.0, 1.0].

use chrono::{Datelike, NaiveDate};

use concilio_core::{DateRange, Money};

/// Lowercases, folds common diacritics and collapses everything that is not
/// alphanumeric into single spaces.
pub fn normalize(s: &str) -> String {
    s.chars()
        .map(fold_char)
        .collect::<String>()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn fold_char(c: char) -> char {
    match c.to_lowercase().next().unwrap_or(c) {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

/// Levenshtein edit distance over chars, two-row O(min(m,n)) space.
fn edit_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    let (m, n) = (a.len(), b.len());

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    let (a, b, m, n) = if m <= n { (a, b, m, n) } else { (b, a, n, m) };

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Symmetric name similarity: containment in either direction scores high,
/// otherwise normalized edit distance. Blank input never matches.
pub fn name_similarity(a: &str, b: &str) -> f32 {
    let a = normalize(a);
    let b = normalize(b);

    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if short.len() >= 3 && long.contains(short.as_str()) {
        return 0.9;
    }

    let max_len = a.chars().count().max(b.chars().count());
    1.0 - (edit_distance(&a, &b) as f32 / max_len as f32)
}

/// Relative amount proximity over magnitudes. Full score within the tight
/// band, linear decay to zero across the wide band.
pub fn amount_proximity(a: Money, b: Money, tight_band: f32, wide_band: f32) -> f32 {
    let a = a.abs().to_cents();
    let b = b.abs().to_cents();

    if a == 0 && b == 0 {
        return 1.0;
    }

    let rel = (a - b).abs() as f32 / a.max(b) as f32;
    if rel <= tight_band {
        1.0
    } else if rel < wide_band {
        1.0 - (rel - tight_band) / (wide_band - tight_band)
    } else {
        0.0
    }
}

/// Proximity of a date to an expected date (or range). Inside the range
/// scores 1.0; the same calendar month as a bound scores at least 0.8;
/// otherwise linear decay to zero at `window_days`.
pub fn date_proximity(date: NaiveDate, expected: DateRange, window_days: i64) -> f32 {
    let dist = expected.distance_days(date);
    if dist == 0 {
        return 1.0;
    }
    if dist > window_days {
        return 0.0;
    }

    let decay = 1.0 - dist as f32 / window_days as f32;
    if same_month(date, expected.start) || same_month(date, expected.end) {
        decay.max(0.8)
    } else {
        decay
    }
}

fn same_month(a: NaiveDate, b: NaiveDate) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

/// Normalized substring test in either direction. Guards against trivially
/// short fragments.
pub fn keyword_overlap(memo: &str, label: &str) -> bool {
    let memo = normalize(memo);
    let label = normalize(label);

    let (short, long) = if memo.len() <= label.len() {
        (&memo, &label)
    } else {
        (&label, &memo)
    };

    short.len() >= 4 && long.contains(short.as_str())
}
