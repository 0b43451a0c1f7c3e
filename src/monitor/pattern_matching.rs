// src/monitor/pattern_matching.rs - Category classifier with evasion-resistant normalisation

use base64::engine::{general_purpose, Engine};
use log::debug;
use regex::{Regex, RegexBuilder};
use std::collections::{HashMap, HashSet};
use unicode_normalization::UnicodeNormalization;

use crate::config::{CategoryConfig, NormalizationConfig, ScreeningConfig};
use crate::error::{MonitorError, MonitorResult};
use crate::types::ViolationCategory;

/// One configured pattern, in the `~/regex/flags`, `wild*card` or literal syntax
#[derive(Debug, Clone)]
pub enum CategoryPattern {
    /// Literal text match: "kill you"
    Literal(String),
    /// Wildcard pattern: "idiot*", "*hate*"
    Wildcard(String),
    /// Regex pattern: ~/pattern/flags
    Regex { pattern: String, flags: String },
}

impl CategoryPattern {
    /// Parse a pattern string from configuration
    pub fn parse(input: &str) -> Result<Self, String> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err("pattern cannot be empty".to_string());
        }

        if let Some(content) = trimmed.strip_prefix("~/") {
            let last_slash = content
                .rfind('/')
                .ok_or_else(|| "regex pattern must end with '/'".to_string())?;
            let pattern = &content[..last_slash];
            let flags = &content[last_slash + 1..];

            if pattern.is_empty() {
                return Err("regex pattern cannot be empty".to_string());
            }
            for flag in flags.chars() {
                if !matches!(flag, 'i' | 'm' | 's' | 'x') {
                    return Err(format!("unknown regex flag: {}", flag));
                }
            }

            let parsed = CategoryPattern::Regex {
                pattern: pattern.to_string(),
                flags: flags.to_string(),
            };
            // Compile alone first so errors point at the offending pattern
            Regex::new(&parsed.to_regex_source(false))
                .map_err(|e| format!("invalid regex: {}", e))?;
            Ok(parsed)
        } else if trimmed.contains('*') {
            if trimmed.chars().all(|c| c == '*') {
                return Err("wildcard pattern must contain text".to_string());
            }
            Ok(CategoryPattern::Wildcard(trimmed.to_string()))
        } else {
            Ok(CategoryPattern::Literal(trimmed.to_string()))
        }
    }

    /// Regex source for this pattern; callers wrap it in a case-insensitive group
    fn to_regex_source(&self, whole_words_only: bool) -> String {
        match self {
            CategoryPattern::Literal(text) => {
                Self::with_word_bounds(text, regex::escape(text), whole_words_only)
            }
            CategoryPattern::Wildcard(text) => {
                let body = text
                    .split('*')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\S*");
                Self::with_word_bounds(text, body, whole_words_only)
            }
            CategoryPattern::Regex { pattern, flags } => {
                let mut all_flags = String::from("i");
                all_flags.extend(flags.chars().filter(|c| *c != 'i'));
                format!("(?{}:{})", all_flags, pattern)
            }
        }
    }

    /// `\b` is only meaningful next to a word character, so add it per side
    fn with_word_bounds(raw: &str, body: String, whole_words_only: bool) -> String {
        if !whole_words_only {
            return body;
        }
        let is_word = |c: char| c.is_alphanumeric() || c == '_';
        let starts = raw.chars().next().map_or(false, is_word);
        let ends = raw.chars().last().map_or(false, is_word);

        format!(
            "{}{}{}",
            if starts { r"\b" } else { "" },
            body,
            if ends { r"\b" } else { "" }
        )
    }
}

/// A category together with its precompiled scanner
#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub category: ViolationCategory,
    pub description: Option<String>,
    pub patterns: Vec<CategoryPattern>,
    scanner: Regex,
}

impl CategoryRule {
    pub fn compile(
        category: ViolationCategory,
        patterns: &[String],
        whole_words_only: bool,
    ) -> MonitorResult<Self> {
        let mut parsed = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let pattern = CategoryPattern::parse(raw).map_err(|reason| MonitorError::InvalidPattern {
                category: category.name.clone(),
                pattern: raw.clone(),
                reason,
            })?;
            parsed.push(pattern);
        }

        if parsed.is_empty() {
            return Err(MonitorError::InvalidConfig(format!(
                "category '{}' has no patterns",
                category.name
            )));
        }

        let source = parsed
            .iter()
            .map(|p| format!("(?:{})", p.to_regex_source(whole_words_only)))
            .collect::<Vec<_>>()
            .join("|");

        let scanner = RegexBuilder::new(&format!("(?i){}", source))
            .build()
            .map_err(|e| MonitorError::InvalidPattern {
                category: category.name.clone(),
                pattern: source.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            category,
            description: None,
            patterns: parsed,
            scanner,
        })
    }

    fn find(&self, text: &str, normalized: bool) -> Option<MatchedSpan> {
        self.scanner.find(text).map(|m| MatchedSpan {
            start: m.start(),
            end: m.end(),
            text: m.as_str().to_string(),
            normalized,
        })
    }
}

/// Where in the scanned text a category matched.
///
/// When `normalized` is true the offsets refer to the normalised variant
/// of the message, not the raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub normalized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMatch {
    pub category: ViolationCategory,
    pub span: MatchedSpan,
}

/// Stateless classifier over the configured category set
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    rules: Vec<CategoryRule>,
    normalization: NormalizationConfig,
    max_scan_length: usize,
}

impl PatternMatcher {
    pub fn new(normalization: NormalizationConfig, max_scan_length: usize) -> Self {
        Self {
            rules: Vec::new(),
            normalization,
            max_scan_length,
        }
    }

    /// Build the matcher from configuration. A bad pattern fails the whole build.
    pub fn from_config(categories: &[CategoryConfig], screening: &ScreeningConfig) -> MonitorResult<Self> {
        let mut matcher = Self::new(screening.normalization.clone(), screening.max_scan_length);
        for category in categories {
            matcher.add_category(
                ViolationCategory::new(category.name.clone(), category.severity),
                &category.patterns,
                category.whole_words_only,
            )?;
            if let Some(rule) = matcher.rules.last_mut() {
                rule.description = category.description.clone();
            }
        }
        debug!("Pattern matcher ready with {} categories", matcher.rules.len());
        Ok(matcher)
    }

    pub fn add_category(
        &mut self,
        category: ViolationCategory,
        patterns: &[String],
        whole_words_only: bool,
    ) -> MonitorResult<()> {
        if self.rules.iter().any(|r| r.category.name == category.name) {
            return Err(MonitorError::InvalidConfig(format!(
                "duplicate category '{}'",
                category.name
            )));
        }
        let rule = CategoryRule::compile(category, patterns, whole_words_only)?;
        self.rules.push(rule);
        Ok(())
    }

    pub fn rules(&self) -> impl Iterator<Item = &CategoryRule> {
        self.rules.iter()
    }

    pub fn category_count(&self) -> usize {
        self.rules.len()
    }

    /// Classify a message. Each category appears at most once, in configuration order.
    pub fn classify(&self, text: &str) -> Vec<CategoryMatch> {
        let scanned = cap_chars(text, self.max_scan_length);
        if scanned.trim().is_empty() {
            return Vec::new();
        }

        let mut matches = Vec::new();
        let mut seen = HashSet::new();
        let mut variants: Option<Vec<String>> = None;

        for rule in &self.rules {
            if seen.contains(rule.category.name.as_str()) {
                continue;
            }

            let mut span = rule.find(scanned, false);
            if span.is_none() {
                let variants = variants.get_or_insert_with(|| self.variants(scanned));
                span = variants.iter().find_map(|v| rule.find(v, true));
            }

            if let Some(span) = span {
                debug!(
                    "Category '{}' matched '{}'{}",
                    rule.category.name,
                    span.text,
                    if span.normalized { " (normalized)" } else { "" }
                );
                seen.insert(rule.category.name.as_str());
                matches.push(CategoryMatch {
                    category: rule.category.clone(),
                    span,
                });
            }
        }

        matches
    }

    /// Normalised variants of the text, each distinct from the raw input
    fn variants(&self, text: &str) -> Vec<String> {
        let opts = &self.normalization;
        let mut out: Vec<String> = Vec::new();
        let mut push = |candidate: String| {
            if candidate != text && !out.contains(&candidate) {
                out.push(candidate);
            }
        };

        if opts.leetspeak {
            push(Normalizer::fold_leetspeak(text));
        }
        if opts.diacritics {
            push(Normalizer::strip_diacritics(text));
        }
        if opts.homoglyphs {
            push(Normalizer::fold_homoglyphs(text));
        }
        if opts.repeated_chars {
            push(Normalizer::compress_repeats(text, 2));
            push(Normalizer::compress_repeats(text, 1));
        }

        // All character folds at once catch mixed evasion like "k1lllll"
        let mut combined = text.to_string();
        if opts.homoglyphs {
            combined = Normalizer::fold_homoglyphs(&combined);
        }
        if opts.diacritics {
            combined = Normalizer::strip_diacritics(&combined);
        }
        if opts.leetspeak {
            combined = Normalizer::fold_leetspeak(&combined);
        }
        if opts.repeated_chars {
            push(Normalizer::compress_repeats(&combined, 1));
            combined = Normalizer::compress_repeats(&combined, 2);
        }
        push(combined);

        if opts.encoded_content {
            for decoded in Normalizer::decode_encoded(text) {
                push(decoded);
            }
        }

        out
    }
}

/// Pick the category to record for a message: highest severity, earliest on ties
pub fn primary_match(matches: &[CategoryMatch]) -> Option<&CategoryMatch> {
    let mut best: Option<&CategoryMatch> = None;
    for candidate in matches {
        match best {
            Some(current) if current.category.severity >= candidate.category.severity => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// Truncate to at most `max` characters on a char boundary
pub fn cap_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

struct Normalizer;

impl Normalizer {
    fn fold_leetspeak(text: &str) -> String {
        let leetspeak_map: HashMap<char, char> = [
            ('0', 'o'), ('1', 'i'), ('3', 'e'), ('4', 'a'), ('5', 's'),
            ('7', 't'), ('8', 'b'), ('9', 'g'),
            ('@', 'a'), ('$', 's'), ('+', 't'), ('!', 'i'), ('|', 'l'),
        ].iter().cloned().collect();

        text.chars()
            .map(|c| leetspeak_map.get(&c).copied().unwrap_or(c))
            .collect()
    }

    fn strip_diacritics(text: &str) -> String {
        text.nfd().filter(|c| !Self::is_combining_mark(*c)).collect()
    }

    fn is_combining_mark(c: char) -> bool {
        matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
    }

    fn fold_homoglyphs(text: &str) -> String {
        let homoglyph_map: HashMap<char, char> = [
            // Cyrillic
            ('а', 'a'), ('е', 'e'), ('о', 'o'), ('р', 'p'), ('с', 'c'),
            ('х', 'x'), ('у', 'y'), ('і', 'i'), ('ѕ', 's'), ('к', 'k'),
            ('А', 'A'), ('В', 'B'), ('Е', 'E'), ('К', 'K'), ('М', 'M'),
            ('Н', 'H'), ('О', 'O'), ('Р', 'P'), ('С', 'C'), ('Т', 'T'),
            ('Х', 'X'),
            // Greek
            ('α', 'a'), ('ο', 'o'), ('ρ', 'p'), ('υ', 'u'), ('ι', 'i'),
            ('κ', 'k'), ('ν', 'v'), ('Α', 'A'), ('Β', 'B'), ('Ε', 'E'),
            ('Ζ', 'Z'), ('Η', 'H'), ('Ι', 'I'), ('Κ', 'K'), ('Μ', 'M'),
            ('Ν', 'N'), ('Ο', 'O'), ('Ρ', 'P'), ('Τ', 'T'), ('Χ', 'X'),
            // Fullwidth digits
            ('０', '0'), ('１', '1'), ('２', '2'), ('３', '3'), ('４', '4'),
            ('５', '5'), ('６', '6'), ('７', '7'), ('８', '8'), ('９', '9'),
        ].iter().cloned().collect();

        text.chars()
            .map(|c| homoglyph_map.get(&c).copied().unwrap_or(c))
            .collect()
    }

    /// Collapse runs of the same character to at most `keep` ("stuuupid" -> "stuupid")
    fn compress_repeats(text: &str, keep: usize) -> String {
        let mut result = String::with_capacity(text.len());
        let mut prev_char = None;
        let mut run = 0;

        for ch in text.chars() {
            if prev_char == Some(ch) {
                run += 1;
            } else {
                run = 1;
            }
            if run <= keep {
                result.push(ch);
            }
            prev_char = Some(ch);
        }

        result
    }

    /// Base64 and percent-encoded payloads
    fn decode_encoded(text: &str) -> Vec<String> {
        let mut decoded = Vec::new();
        let trimmed = text.trim();

        if trimmed.len() >= 8 && !trimmed.contains(char::is_whitespace) {
            if let Ok(bytes) = general_purpose::STANDARD.decode(trimmed) {
                match String::from_utf8(bytes) {
                    Ok(s) => decoded.push(s),
                    // Ordinary words often decode to binary
                    Err(_) => debug!("Ignoring base64 payload that is not UTF-8"),
                }
            }
        }

        if trimmed.contains('%') {
            if let Ok(s) = urlencoding::decode(trimmed) {
                decoded.push(s.into_owned());
            }
        }

        decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn matcher() -> PatternMatcher {
        let mut m = PatternMatcher::new(NormalizationConfig::default(), 4096);
        m.add_category(
            ViolationCategory::new("threat", Severity::Severe),
            &["kill you".to_string(), "~/\\bi('ll| will) hurt\\b/".to_string()],
            true,
        ).unwrap();
        m.add_category(
            ViolationCategory::new("harassment", Severity::Major),
            &["worthless".to_string(), "idiot*".to_string()],
            true,
        ).unwrap();
        m.add_category(
            ViolationCategory::new("spam", Severity::Minor),
            &["free money".to_string(), "*.xyz".to_string()],
            false,
        ).unwrap();
        m
    }

    fn names(matches: &[CategoryMatch]) -> Vec<&str> {
        matches.iter().map(|m| m.category.name.as_str()).collect()
    }

    #[test]
    fn test_clean_message_has_no_matches() {
        assert!(matcher().classify("good morning everyone").is_empty());
        assert!(matcher().classify("").is_empty());
        assert!(matcher().classify("   ").is_empty());
    }

    #[test]
    fn test_case_insensitive_literal() {
        let matches = matcher().classify("I will KILL YOU tomorrow");
        assert_eq!(names(&matches), vec!["threat"]);
        let span = &matches[0].span;
        assert_eq!(span.text, "KILL YOU");
        assert_eq!(span.start, 7);
        assert!(!span.normalized);
    }

    #[test]
    fn test_multiple_categories_in_config_order() {
        let matches = matcher().classify("free money for you, worthless idiot, or I'll hurt you");
        assert_eq!(names(&matches), vec!["threat", "harassment", "spam"]);
    }

    #[test]
    fn test_duplicate_category_hits_are_deduplicated() {
        let matches = matcher().classify("worthless worthless idiots, all of you");
        assert_eq!(names(&matches), vec!["harassment"]);
    }

    #[test]
    fn test_whole_words_only() {
        // "worthlessness" still starts a word but the trailing boundary fails
        assert!(matcher().classify("the worthlessness of it").is_empty());
        assert_eq!(names(&matcher().classify("idiotic move")), vec!["harassment"]);
    }

    #[test]
    fn test_wildcard_substring_mode() {
        assert_eq!(names(&matcher().classify("visit win.xyz now")), vec!["spam"]);
    }

    #[test]
    fn test_regex_pattern() {
        assert_eq!(names(&matcher().classify("i WILL hurt you")), vec!["threat"]);
        assert!(matcher().classify("it will hurt").is_empty());
    }

    #[test]
    fn test_leetspeak_and_repeats() {
        let matches = matcher().classify("w0rthl3ss");
        assert_eq!(names(&matches), vec!["harassment"]);
        assert!(matches[0].span.normalized);

        assert_eq!(names(&matcher().classify("k1llll y0u")), vec!["threat"]);
    }

    #[test]
    fn test_diacritics_and_homoglyphs() {
        assert_eq!(names(&matcher().classify("wórthléss")), vec!["harassment"]);
        // Cyrillic 'о' and 'е'
        assert_eq!(names(&matcher().classify("wоrthlеss")), vec!["harassment"]);
    }

    #[test]
    fn test_encoded_content() {
        assert_eq!(names(&matcher().classify("a2lsbCB5b3U=")), vec!["threat"]);
        assert_eq!(names(&matcher().classify("kill%20you")), vec!["threat"]);
    }

    #[test]
    fn test_normalization_can_be_disabled() {
        let normalization = NormalizationConfig {
            leetspeak: false,
            diacritics: false,
            homoglyphs: false,
            repeated_chars: false,
            encoded_content: false,
        };
        let mut m = PatternMatcher::new(normalization, 4096);
        m.add_category(
            ViolationCategory::new("harassment", Severity::Major),
            &["worthless".to_string()],
            true,
        ).unwrap();

        assert!(m.classify("w0rthl3ss").is_empty());
        assert_eq!(m.classify("Worthless").len(), 1);
    }

    #[test]
    fn test_scan_length_cap() {
        let mut m = PatternMatcher::new(NormalizationConfig::default(), 10);
        m.add_category(
            ViolationCategory::new("harassment", Severity::Major),
            &["worthless".to_string()],
            false,
        ).unwrap();

        assert!(m.classify("0123456789 worthless").is_empty());
        assert_eq!(m.classify("worthless!").len(), 1);
        assert_eq!(cap_chars("héllo", 2), "hé");
    }

    #[test]
    fn test_invalid_patterns_rejected() {
        assert!(CategoryPattern::parse("").is_err());
        assert!(CategoryPattern::parse("***").is_err());
        assert!(CategoryPattern::parse("~/unclosed").is_err());
        assert!(CategoryPattern::parse("~/(open/i").is_err());
        assert!(CategoryPattern::parse("~/ok/q").is_err());

        let mut m = PatternMatcher::new(NormalizationConfig::default(), 100);
        let err = m
            .add_category(ViolationCategory::new("bad", Severity::Minor), &["~/[z-a]/".to_string()], false)
            .unwrap_err();
        assert!(matches!(err, MonitorError::InvalidPattern { .. }));
    }

    #[test]
    fn test_duplicate_category_rejected() {
        let mut m = matcher();
        let err = m
            .add_category(ViolationCategory::new("spam", Severity::Minor), &["x".to_string()], false)
            .unwrap_err();
        assert!(matches!(err, MonitorError::InvalidConfig(_)));
    }

    #[test]
    fn test_primary_match_prefers_severity_then_order() {
        let matches = matcher().classify("worthless, free money, kill you");
        assert_eq!(primary_match(&matches).unwrap().category.name, "threat");

        let mut m = PatternMatcher::new(NormalizationConfig::default(), 100);
        m.add_category(ViolationCategory::new("first", Severity::Major), &["aaa".to_string()], false).unwrap();
        m.add_category(ViolationCategory::new("second", Severity::Major), &["bbb".to_string()], false).unwrap();
        let matches = m.classify("bbb aaa");
        assert_eq!(primary_match(&matches).unwrap().category.name, "first");

        assert!(primary_match(&[]).is_none());
    }

    #[test]
    fn test_binary_base64_words_are_skipped() {
        // "whatever" is valid base64 but decodes to invalid UTF-8
        assert!(Normalizer::decode_encoded("whatever").is_empty());
        assert!(matcher().classify("whatever").is_empty());
    }
}
