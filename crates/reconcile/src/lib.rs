pub mod match_engine;
pub mod memo;

pub use match_engine::{
    Ambiguity, AmountMatcher, CandidatePicker, FirstCandidate, Match, MatchOutcome, MatchType,
};
pub use memo::{Memo, MemoBuilder, MemoFormat, MemoOptions, TRUNCATION_MARKER, YNAB_MEMO_LIMIT};
