//! Minimal analysis: whitespace tokens or the whole value.

use crate::document::Field;

/// Returns the tokens a field contributes to the index.
///
/// Tokenized fields split on whitespace; untokenized fields yield their
/// whole value. Unindexed fields yield nothing.
pub fn tokens(field: &Field) -> Box<dyn Iterator<Item = &str> + '_> {
    if !field.indexed {
        Box::new(std::iter::empty())
    } else if field.tokenized {
        Box::new(field.value.split_whitespace())
    } else {
        Box::new(std::iter::once(field.value.as_str()))
    }
}

/// Returns the number of tokens a field contributes.
#[must_use]
pub fn token_count(field: &Field) -> u32 {
    u32::try_from(tokens(field).count()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Index, Store};

    #[test]
    fn whitespace_split() {
        let f = Field::new("c", "  aaa bbb\tccc ", Store::No, Index::Analyzed);
        assert_eq!(tokens(&f).collect::<Vec<_>>(), vec!["aaa", "bbb", "ccc"]);
        assert_eq!(token_count(&f), 3);
    }

    #[test]
    fn untokenized_is_whole_value() {
        let f = Field::new("id", "a b", Store::Yes, Index::NotAnalyzed);
        assert_eq!(tokens(&f).collect::<Vec<_>>(), vec!["a b"]);
    }

    #[test]
    fn unindexed_has_no_tokens() {
        let f = Field::new("raw", "a b", Store::Yes, Index::No);
        assert_eq!(token_count(&f), 0);
    }
}
