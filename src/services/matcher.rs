//! Fuzzy matching of provider titles to local directory names

use rapidfuzz::distance::indel;

use super::text_utils::normalize_title;

/// Minimum similarity for a fuzzy match to be accepted
pub const MATCH_THRESHOLD: f64 = 0.9;

/// Similarity (0.0 to 1.0) of two already normalized strings.
///
/// Ratcliff/Obershelp ratio: the longest common block is matched first, then
/// the pieces left and right of it recursively, and the score is twice the
/// matched length over the total length.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    2.0 * matched_len(&a, &b) as f64 / (a.len() + b.len()) as f64
}

/// Total length of the matching blocks of `a` and `b`
fn matched_len(a: &[char], b: &[char]) -> usize {
    let mut total = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_block(a, b, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        total += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }
    total
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]` as `(i, j, size)`.
///
/// Ties go to the block starting earliest in `a`, then earliest in `b`.
fn longest_block(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    // run length of the block ending at (i - 1, j), indexed by j - blo
    let mut prev = vec![0usize; bhi - blo];
    let mut cur = vec![0usize; bhi - blo];

    for i in alo..ahi {
        for j in blo..bhi {
            let k = if a[i] == b[j] {
                if j > blo { prev[j - blo - 1] + 1 } else { 1 }
            } else {
                0
            };
            cur[j - blo] = k;
            if k > best_size {
                best_i = i + 1 - k;
                best_j = j + 1 - k;
                best_size = k;
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    (best_i, best_j, best_size)
}

/// Best scoring candidate for `title`. An exact normalized match wins outright.
pub fn best_match<'a, I>(title: &str, candidates: I) -> Option<(&'a str, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    let target = normalize_title(title);
    let mut best: Option<(&'a str, f64)> = None;

    for candidate in candidates {
        let normalized = normalize_title(candidate);
        if normalized == target {
            return Some((candidate, 1.0));
        }
        // The indel ratio bounds the block ratio from above, so a candidate
        // that cannot beat the current best skips the block search.
        if let Some((_, best_score)) = best
            && indel::normalized_similarity(target.chars(), normalized.chars()) <= best_score
        {
            continue;
        }
        let score = similarity(&target, &normalized);
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    best
}

/// Best candidate only if it clears [MATCH_THRESHOLD]
pub fn accepted_match<'a, I>(title: &str, candidates: I) -> Option<(&'a str, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    best_match(title, candidates).filter(|(_, score)| *score >= MATCH_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_and_punctuation_are_ignored() {
        let (name, score) = best_match("The Matrix (1999)", ["Matrix 1999", "Inception"]).unwrap();
        assert_eq!(name, "Matrix 1999");
        assert!(score > MATCH_THRESHOLD);
    }

    #[test]
    fn test_close_titles_pass_threshold() {
        let (name, score) =
            accepted_match("Spider-Man: Homecoming", ["Spiderman Homecomming", "Venom"]).unwrap();
        assert_eq!(name, "Spiderman Homecomming");
        assert!(score < 1.0);
    }

    #[test]
    fn test_unrelated_titles_are_rejected() {
        assert!(best_match("Alien", ["Inception", "Heat"]).unwrap().1 < MATCH_THRESHOLD);
        assert_eq!(accepted_match("Alien", ["Inception", "Heat"]), None);
        assert_eq!(best_match("Alien", std::iter::empty()), None);
    }

    #[test]
    fn test_similarity_is_ratio() {
        assert_eq!(similarity("abcd", "abcd"), 1.0);
        assert!((similarity("abcd", "abce") - 0.75).abs() < 1e-9);
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_blocks_are_matched_greedily_not_as_subsequence() {
        // The common subsequence is 9 long, but after taking the longest block
        // first only 8 characters can still be matched.
        let score = similarity("cababbbcb", "cabaababbcb");
        assert!((score - 0.8).abs() < 1e-9, "score was {}", score);
        assert_eq!(accepted_match("cababbbcb", ["cabaababbcb"]), None);
    }

    #[test]
    fn test_bound_does_not_hide_a_better_candidate() {
        let (name, _) =
            best_match("Spider-Man: Homecoming", ["Spiderman", "Spiderman Homecomming"]).unwrap();
        assert_eq!(name, "Spiderman Homecomming");
    }
}
