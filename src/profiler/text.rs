//! Text normalization, tokenization and keyword patterns shared by the
//! rule cascade and the anchor model.

/// Tokens taken from the front of a document when tokenizing; titles are
/// short, so a bounded prefix captures everything that matters.
const MAX_DOC_TOKENS: usize = 64;

/// Lowercase and strip punctuation except `$ + . : -`, collapsing
/// whitespace. Input parts are joined with single spaces.
pub fn normalize_text(parts: &[&str]) -> String {
    let joined = parts.join(" ");
    let mut out = String::with_capacity(joined.len());
    let mut last_space = true;
    for c in joined.chars() {
        let keep = c.is_alphanumeric() || matches!(c, '$' | '+' | '.' | ':' | '-');
        if keep {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Unigrams plus adjacent-token bigrams over a bounded document prefix.
pub fn tokenize(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().take(MAX_DOC_TOKENS).collect();
    let mut tokens = Vec::with_capacity(words.len() * 2);
    for w in &words {
        tokens.push((*w).to_string());
    }
    for pair in words.windows(2) {
        tokens.push(format!("{}_{}", pair[0], pair[1]));
    }
    tokens
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

const CRYPTO_KEYWORDS: &[&str] = &[
    "bitcoin", "btc", "ethereum", "eth", "solana", "sol", "xrp", "dogecoin", "crypto",
    "stablecoin", "defi", "binance", "coinbase",
];

const SPORTS_KEYWORDS: &[&str] = &[
    "nba", "nfl", "mlb", "nhl", "ncaa", "soccer", "football", "basketball", "baseball",
    "hockey", "tennis", "golf", "ufc", "premier league", "champions league", "super bowl",
    "world cup", "playoff", "finals",
];

pub fn is_crypto_context(normalized_category: &str, text: &str) -> bool {
    normalized_category == "crypto" || contains_any(text, CRYPTO_KEYWORDS)
}

pub fn is_sports_context(normalized_category: &str, text: &str) -> bool {
    normalized_category == "sports" || contains_any(text, SPORTS_KEYWORDS)
}

/// Price-anchor phrasing: a threshold comparator or a dollar figure.
pub fn has_price_anchor(text: &str) -> bool {
    contains_any(
        text,
        &["above", "below", "over", "under", "at least", ">=", "<=", "$"],
    )
}

pub fn has_digit(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}

/// In-play score / game-prop phrasing.
pub fn has_live_score_pattern(text: &str) -> bool {
    contains_any(
        text,
        &[
            "score", "halftime", "half time", "quarter", "1st half", "2nd half", "overtime",
            "next goal", "next touchdown", "next basket", "win by", "margin of victory",
            "total points", "to win game", "win tonight", "beat the",
        ],
    )
}

/// Roster / personnel phrasing that moves on reporting, not on the field.
pub fn has_team_news_pattern(text: &str) -> bool {
    contains_any(
        text,
        &[
            "injury", "injured", "out for", "traded", "trade deadline", "sign with", "signs",
            "signing", "coach", "fired", "suspended", "roster", "lineup", "starting",
            "ruled out", "mvp", "draft",
        ],
    )
}

/// Scheduled macroeconomic release phrasing.
pub fn has_macro_pattern(text: &str) -> bool {
    contains_any(
        text,
        &[
            "cpi", "inflation", "fomc", "fed funds", "rate decision", "rate cut", "rate hike",
            "nonfarm", "payroll", "jobs report", "gdp", "unemployment", "pce",
            "interest rate", "recession",
        ],
    )
}

/// Crypto news/security event phrasing.
pub fn has_crypto_news_pattern(text: &str) -> bool {
    contains_any(
        text,
        &[
            "hack", "exploit", "etf", "sec", "listing", "listed", "delist", "upgrade",
            "hard fork", "halving", "airdrop", "bankrupt", "breach", "depeg", "mainnet",
        ],
    )
}

/// Policy / regulatory decision phrasing.
pub fn has_policy_pattern(text: &str) -> bool {
    contains_any(
        text,
        &[
            "bill", "law", "executive order", "regulation", "ban", "approve", "approval",
            "ruling", "court", "veto", "nominee", "confirm", "tariff", "sanction",
            "shutdown", "impeach", "resign", "pardon",
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_keeps_price_punctuation() {
        assert_eq!(
            normalize_text(&["Will BTC close above $100,000?!"]),
            "will btc close above $100 000"
        );
        assert_eq!(normalize_text(&["A", "B"]), "a b");
        assert_eq!(normalize_text(&["FED-25DEC: 4.00%+"]), "fed-25dec: 4.00 +");
    }

    #[test]
    fn tokenize_emits_unigrams_then_bigrams() {
        let tokens = tokenize("btc above 100k");
        assert_eq!(
            tokens,
            vec!["btc", "above", "100k", "btc_above", "above_100k"]
        );
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn context_checks() {
        assert!(is_crypto_context("crypto", "anything"));
        assert!(is_crypto_context("other", "will bitcoin rally"));
        assert!(!is_crypto_context("politics", "will the bill pass"));

        assert!(is_sports_context("sports", "anything"));
        assert!(is_sports_context("other", "nba finals winner"));
        assert!(!is_sports_context("macro", "cpi above 3"));
    }

    #[test]
    fn pattern_checks() {
        assert!(has_price_anchor("btc above $100k"));
        assert!(has_digit("btc above $100k"));
        assert!(!has_price_anchor("who wins the match"));

        assert!(has_live_score_pattern("chiefs win by 7"));
        assert!(has_team_news_pattern("star player injured before the game"));
        assert!(has_macro_pattern("cpi print above 3.1"));
        assert!(has_crypto_news_pattern("eth etf approval"));
        assert!(has_policy_pattern("senate passes the bill"));
    }
}
