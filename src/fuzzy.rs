//! Module `fuzzy` implement the fuzzy path rule engine.
//!
//! Higher layers use fuzzy rules to canonicalize variant URLs before
//! looking them up, typically to strip volatile query parameters from
//! recorded web content. A rules file is a sequence of blocks:
//!
//! ```text
//! MATCH <regex>
//! REPLACE <template>
//! SPLIT <delim>   | RSPLIT <delim>
//! ARGS a&b&c
//! ```
//!
//! Rule order is preserved; the first matching rule wins.

use regex::Regex;

/// One rewrite rule.
pub struct FuzzyRule {
    match_str: String,
    match_pattern: Option<Regex>,
    replace: String,
    split_str: String,
    split_last: bool,
    args_list: Vec<Vec<String>>,
}

impl FuzzyRule {
    fn new(match_str: &str) -> FuzzyRule {
        FuzzyRule {
            match_str: match_str.to_string(),
            // a rule whose pattern does not compile never matches.
            match_pattern: Regex::new(match_str).ok(),
            replace: String::new(),
            split_str: "?".to_string(),
            split_last: false,
            args_list: vec![],
        }
    }

    pub fn to_match_pattern(&self) -> &str {
        &self.match_str
    }

    fn matches(&self, url: &str) -> bool {
        match &self.match_pattern {
            Some(re) => re.is_match(url),
            None => false,
        }
    }
}

/// An ordered list of [FuzzyRule] values parsed from a rules file.
#[derive(Default)]
pub struct FuzzyRules {
    pub rules: Vec<FuzzyRule>,
}

impl FuzzyRules {
    /// Parse rules data. Unknown directives and directives appearing
    /// before the first MATCH are ignored.
    pub fn new(data: &str) -> FuzzyRules {
        let mut rules: Vec<FuzzyRule> = vec![];
        let mut current: Option<FuzzyRule> = None;

        for line in data.lines() {
            let (order, value) = match line.find(' ') {
                Some(k) => (&line[..k], &line[k + 1..]),
                None => continue,
            };
            match (order, current.as_mut()) {
                ("MATCH", _) => {
                    if let Some(rule) = current.take() {
                        rules.push(rule);
                    }
                    current = Some(FuzzyRule::new(value));
                }
                ("REPLACE", Some(rule)) => rule.replace = value.to_string(),
                ("SPLIT", Some(rule)) => {
                    rule.split_str = value.to_string();
                    rule.split_last = false;
                }
                ("RSPLIT", Some(rule)) => {
                    rule.split_str = value.to_string();
                    rule.split_last = true;
                }
                ("ARGS", Some(rule)) => {
                    let args = value.split('&').map(|s| s.to_string()).collect();
                    rule.args_list.push(args);
                }
                _ => (),
            }
        }
        if let Some(rule) = current.take() {
            rules.push(rule);
        }

        FuzzyRules { rules }
    }

    fn get_rule(&self, url: &str) -> Option<&FuzzyRule> {
        self.rules.iter().find(|rule| rule.matches(url))
    }

    /// Candidate lookup paths for `path` with its query parameters: the
    /// path as queried, the canonical rewrite of the first matching
    /// rule, and one candidate per ARGS line keeping only the listed
    /// parameters.
    pub fn get_fuzzy_paths(&self, path: &str, query: &[(String, String)]) -> Vec<String> {
        let mut url_queried = format!("{}?", path);
        let mut sep = "";
        for (key, value) in query {
            url_queried.push_str(&format!("{}{}={}", sep, key, value));
            sep = "&";
        }

        let mut paths = vec![url_queried.clone()];

        let rule = match self.get_rule(&url_queried) {
            Some(rule) => rule,
            None => {
                let candidate = match url_queried.find('?') {
                    Some(k) => url_queried[..k + 1].to_string(),
                    None => url_queried,
                };
                paths.push(candidate);
                return paths;
            }
        };

        let mut canonical = if !rule.replace.is_empty() {
            match &rule.match_pattern {
                Some(re) => re.replace_all(&url_queried, rule.replace.as_str()).to_string(),
                None => url_queried.clone(),
            }
        } else {
            let split_idx = match rule.split_last {
                true => url_queried.rfind(&rule.split_str),
                false => url_queried.find(&rule.split_str),
            };
            match split_idx {
                Some(k) => url_queried[..k + rule.split_str.len()].to_string(),
                None => url_queried.clone(),
            }
        };

        // whatever query string survived the rewrite is dropped.
        if let Some(k) = canonical.find('?') {
            canonical.truncate(k);
        }
        paths.push(canonical.clone());

        for args in rule.args_list.iter() {
            let mut candidate = canonical.clone();
            let mut sep = '?';
            for arg in args {
                let value = query
                    .iter()
                    .find(|(key, _)| key == arg)
                    .map(|(_, value)| value.as_str())
                    .unwrap_or("");
                candidate.push(sep);
                candidate.push_str(arg);
                candidate.push('=');
                candidate.push_str(value);
                sep = '&';
            }
            paths.push(candidate);
        }

        paths
    }
}

#[cfg(test)]
#[path = "fuzzy_test.rs"]
mod fuzzy_test;
