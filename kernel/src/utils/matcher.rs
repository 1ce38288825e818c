// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! A consuming cursor over a string, for picking apart simple
//! commands and key-value syntax.

/// A cursor that consumes matched prefixes of a string.
///
#[derive(Debug, Clone)]
pub struct Matcher<'text> {
    text: &'text str,
    index: usize,
}

impl<'text> Matcher<'text> {
    /// Returns a matcher over the whole of `text`.
    ///
    pub fn new(text: &'text str) -> Self {
        Matcher { text, index: 0 }
    }

    /// Returns the unconsumed remainder.
    ///
    pub fn remaining(&self) -> &'text str {
        &self.text[self.index..]
    }

    /// Returns a matcher over the byte range `[first, last]` of
    /// the unconsumed remainder.
    ///
    pub fn slice(&self, first: usize, last: usize) -> Matcher<'text> {
        let remaining = self.remaining();

        Matcher {
            text: &remaining[first..=last],
            index: 0,
        }
    }

    /// Consumes `expected` if the remainder starts with it,
    /// returning whether it did.
    ///
    pub fn consume_str_if_match(&mut self, expected: &str) -> bool {
        if self.remaining().starts_with(expected) {
            self.index += expected.len();
            return true;
        }

        false
    }

    /// Consumes `expected` if the remainder starts with it as a
    /// whole word, i.e. followed by whitespace or the end of the
    /// text. The whitespace itself is not consumed.
    ///
    pub fn consume_word_if_match(&mut self, expected: &str) -> bool {
        let remaining = self.remaining();
        if !remaining.starts_with(expected) {
            return false;
        }
        let after = &remaining[expected.len()..];
        if after.chars().next().map_or(false, |c| !c.is_whitespace()) {
            return false;
        }

        self.index += expected.len();
        true
    }

    /// Consumes any leading whitespace.
    ///
    pub fn skip_whitespace(&mut self) {
        let remaining = self.remaining();
        let trimmed = remaining.trim_start();
        self.index += remaining.len() - trimmed.len();
    }

    /// Consumes and returns the next whitespace-delimited word, or
    /// `None` if only whitespace remains.
    ///
    pub fn consume_word(&mut self) -> Option<&'text str> {
        self.skip_whitespace();
        let remaining = self.remaining();
        if remaining.is_empty() {
            return None;
        }

        let end = remaining
            .find(|c: char| c.is_whitespace())
            .unwrap_or(remaining.len());
        self.index += end;

        Some(&remaining[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_and_word_matching() {
        let mut matcher = Matcher::new("mount /dev/disk0");
        assert!(!matcher.consume_word_if_match("mou"));
        assert!(matcher.consume_word_if_match("mount"));

        // The separating whitespace was left in place.
        assert_eq!(matcher.remaining(), " /dev/disk0");
        matcher.skip_whitespace();
        assert!(matcher.consume_str_if_match("/dev/"));
        assert_eq!(matcher.remaining(), "disk0");
        assert!(!matcher.consume_str_if_match("disk1"));
    }

    #[test]
    fn word_iteration() {
        let mut matcher = Matcher::new("  alpha beta\tgamma  ");
        assert_eq!(matcher.consume_word(), Some("alpha"));
        assert_eq!(matcher.consume_word(), Some("beta"));
        assert_eq!(matcher.consume_word(), Some("gamma"));
        assert_eq!(matcher.consume_word(), None);
    }

    #[test]
    fn word_match_requires_boundary() {
        let mut matcher = Matcher::new("mountpoint");
        assert!(!matcher.consume_word_if_match("mount"));
        // A plain string match has no such qualms.
        assert!(matcher.consume_str_if_match("mount"));
        assert_eq!(matcher.remaining(), "point");
    }

    #[test]
    fn slicing() {
        let matcher = Matcher::new("abcdef");
        let sliced = matcher.slice(1, 3);
        assert_eq!(sliced.remaining(), "bcd");
    }
}
