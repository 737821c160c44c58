//! Turns raw looked-up records into the final rendered entry: `@@@LINK=`
//! alias resolution, stylesheet tag substitution, overlay injection and
//! body normalization.

use std::collections::HashMap;

use regex::Regex;
use tracing::debug;

use crate::dictionary::Dictionary;
use crate::error::Result;

/// Link chains longer than this are treated as cycles and cut off.
pub const DEFAULT_LINK_DEPTH: usize = 8;

pub struct DefinitionPostProcessor {
    injection_html: String,
    link_depth: usize,
    link_re: Regex,
    tag_re: Regex,
}

impl DefinitionPostProcessor {
    pub fn new(injection_html: String) -> Self {
        Self::with_link_depth(injection_html, DEFAULT_LINK_DEPTH)
    }

    pub fn with_link_depth(injection_html: String, link_depth: usize) -> Self {
        Self {
            injection_html,
            link_depth,
            link_re: Regex::new(r"^@@@LINK=([\w\s]*)").unwrap(),
            tag_re: Regex::new(r"`(\d+)`").unwrap(),
        }
    }

    /// Full pipeline for an HTTP body: resolve links, substitute stylesheet
    /// tags, normalize, then append the overlay HTML.
    pub fn render(&self, dict: &Dictionary, records: Vec<String>) -> Result<String> {
        let records = self.resolve_links(dict, records)?;
        let stylesheet = dict.stylesheet();
        let mut body = String::new();
        for record in &records {
            if stylesheet.is_empty() {
                body.push_str(record);
            } else {
                body.push_str(&self.substitute_stylesheet(record, stylesheet));
            }
        }
        let mut body = body.replace("\r\n", "").replace("entry:/", "");
        body.push_str(&self.injection_html);
        Ok(body)
    }

    /// Follow `@@@LINK=target` records through the same dictionary, at most
    /// `link_depth` hops. Records still pointing at a link after that are
    /// dropped, which also breaks cycles.
    pub fn resolve_links(&self, dict: &Dictionary, records: Vec<String>) -> Result<Vec<String>> {
        let mut current = records;
        for _ in 0..self.link_depth {
            let mut expanded = Vec::with_capacity(current.len());
            let mut followed = false;
            for record in &current {
                match self.link_target(record) {
                    Some(target) => {
                        debug!(target, "following entry link");
                        let linked = dict.lookup_text(target)?;
                        if !linked.is_empty() {
                            followed = true;
                        }
                        expanded.extend(linked);
                    }
                    None => expanded.push(record.clone()),
                }
            }
            current = expanded;
            if !followed {
                return Ok(current);
            }
        }
        Ok(current
            .into_iter()
            .filter(|r| self.link_target(r).is_none())
            .collect())
    }

    fn link_target<'a>(&self, record: &'a str) -> Option<&'a str> {
        self.link_re
            .captures(record)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().trim())
    }

    /// Substitute `` `N` `` stylesheet tokens: the leading fragment passes
    /// through, every following fragment is wrapped in the pair registered
    /// for its tag. A fragment that ends in a newline keeps a clean `\r\n`
    /// terminator instead.
    pub fn substitute_stylesheet(
        &self,
        txt: &str,
        stylesheet: &HashMap<String, (String, String)>,
    ) -> String {
        let mut out = String::with_capacity(txt.len());
        let mut pending_tag: Option<&str> = None;
        let mut last_end = 0;
        for cap in self.tag_re.captures_iter(txt) {
            let token = cap.get(0).unwrap();
            emit_fragment(
                &mut out,
                pending_tag.and_then(|t| stylesheet.get(t)),
                &txt[last_end..token.start()],
            );
            pending_tag = Some(cap.get(1).unwrap().as_str());
            last_end = token.end();
        }
        emit_fragment(
            &mut out,
            pending_tag.and_then(|t| stylesheet.get(t)),
            &txt[last_end..],
        );
        out
    }
}

fn emit_fragment(out: &mut String, style: Option<&(String, String)>, fragment: &str) {
    let Some((prefix, suffix)) = style else {
        // leading fragment, or a tag with no stylesheet entry
        out.push_str(fragment);
        return;
    };
    if fragment.ends_with('\n') {
        let trimmed = fragment.trim_end();
        if !trimmed.is_empty() {
            out.push_str(prefix);
            out.push_str(trimmed);
            out.push_str(suffix);
        }
        out.push_str("\r\n");
    } else {
        out.push_str(prefix);
        out.push_str(fragment);
        out.push_str(suffix);
    }
}
