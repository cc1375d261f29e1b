use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// `app_config` key holding the active rule set as JSON.
pub const CONFIG_KEY: &str = "signal_rules";

pub const DONE: &str = "done";
pub const BLOCKER: &str = "blocker";

/// Keyword rules for signal detection, kept as data so they can be swapped
/// through `app_config` without a rebuild.
///
/// `signals` maps a signal name to phrases matched as case-insensitive
/// substrings. Checklist and mention patterns are regular expressions;
/// checklist patterns are applied per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRules {
    pub signals: BTreeMap<String, Vec<String>>,
    pub checklist_open: Vec<String>,
    pub checklist_done: Vec<String>,
    pub mention: String,
}

impl Default for SignalRules {
    fn default() -> Self {
        let phrases = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let mut signals = BTreeMap::new();
        signals.insert(
            DONE.to_string(),
            phrases(&[
                "done", "completed", "finished", "shipped", "merged", "deployed", "resolved",
                "완료", "끝냈", "배포했",
            ]),
        );
        signals.insert(
            BLOCKER.to_string(),
            phrases(&[
                "blocked", "blocker", "stuck", "waiting on", "waiting for", "can't proceed",
                "막힘", "막혔", "지연", "이슈",
            ]),
        );
        Self {
            signals,
            checklist_open: phrases(&[
                r"^\s*[-*+]\s*\[ \]",
                r"^\s*(:white_large_square:|:black_square_button:|☐)",
            ]),
            checklist_done: phrases(&[
                r"^\s*[-*+]\s*\[[xX]\]",
                r"^\s*(:white_check_mark:|:heavy_check_mark:|:ballot_box_with_check:|✅|☑|✔)",
            ]),
            mention: r"<@[UW][A-Z0-9]+".to_string(),
        }
    }
}

impl SignalRules {
    /// Read rules from a stored config value, falling back to the defaults
    /// when nothing is stored or the JSON doesn't parse.
    pub fn from_config(value: Option<&str>) -> Self {
        match value {
            None => Self::default(),
            Some(json) => match serde_json::from_str(json) {
                Ok(rules) => rules,
                Err(e) => {
                    log::warn!("Ignoring invalid {CONFIG_KEY} ({e}); using defaults");
                    Self::default()
                }
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate a rule set supplied by the user.
    pub fn parse(json: &str) -> Result<Self> {
        let rules: SignalRules = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid signal rules: {e}")))?;
        rules.compile()?;
        Ok(rules)
    }

    pub fn compile(&self) -> Result<CompiledRules> {
        let compile_all = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| Error::Config(format!("invalid pattern {p:?}: {e}")))
                })
                .collect()
        };
        let signals = self
            .signals
            .iter()
            .map(|(name, phrases)| {
                let lowered = phrases
                    .iter()
                    .map(|p| p.to_lowercase())
                    .filter(|p| !p.is_empty())
                    .collect();
                (name.clone(), lowered)
            })
            .collect();
        Ok(CompiledRules {
            signals,
            checklist_open: compile_all(&self.checklist_open)?,
            checklist_done: compile_all(&self.checklist_done)?,
            mention: Regex::new(&self.mention)
                .map_err(|e| Error::Config(format!("invalid mention pattern: {e}")))?,
        })
    }
}

/// Checklist items found in one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChecklistCount {
    pub total: u32,
    pub done: u32,
}

/// Rules ready to run against message text.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    signals: Vec<(String, Vec<String>)>,
    checklist_open: Vec<Regex>,
    checklist_done: Vec<Regex>,
    mention: Regex,
}

impl CompiledRules {
    pub fn signal_names(&self) -> impl Iterator<Item = &str> {
        self.signals.iter().map(|(name, _)| name.as_str())
    }

    /// Names of the signals whose phrases appear in `text`.
    pub fn matching_signals<'a>(&'a self, text: &str) -> Vec<&'a str> {
        let lowered = text.to_lowercase();
        self.signals
            .iter()
            .filter(|(_, phrases)| phrases.iter().any(|p| lowered.contains(p.as_str())))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn checklist(&self, text: &str) -> ChecklistCount {
        let mut count = ChecklistCount::default();
        for line in text.lines() {
            if self.checklist_done.iter().any(|re| re.is_match(line)) {
                count.total += 1;
                count.done += 1;
            } else if self.checklist_open.iter().any(|re| re.is_match(line)) {
                count.total += 1;
            }
        }
        count
    }

    pub fn has_mention(&self, text: &str) -> bool {
        self.mention.is_match(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_signals_case_insensitive() {
        let rules = SignalRules::default().compile().unwrap();
        assert_eq!(rules.matching_signals("API migration DONE"), vec![DONE]);
        assert_eq!(rules.matching_signals("배포 완료했습니다"), vec![DONE]);
        assert_eq!(rules.matching_signals("I'm Blocked on review"), vec![BLOCKER]);
        assert!(rules.matching_signals("lunch?").is_empty());
        // A message may carry more than one signal
        let mut both = rules.matching_signals("done with A, stuck on B");
        both.sort();
        assert_eq!(both, vec![BLOCKER, DONE]);
    }

    #[test]
    fn test_checklist_markdown_and_emoji() {
        let rules = SignalRules::default().compile().unwrap();
        let text = "Today:\n- [x] write tests\n- [ ] deploy\n* [X] review\n:white_check_mark: standup\n☐ retro\nnot a - [ ] item";
        assert_eq!(rules.checklist(text), ChecklistCount { total: 5, done: 3 });
        assert_eq!(rules.checklist("no items"), ChecklistCount::default());
    }

    #[test]
    fn test_mention() {
        let rules = SignalRules::default().compile().unwrap();
        assert!(rules.has_mention("ping <@U1ABC>"));
        assert!(rules.has_mention("<@W02XYZ|bob> look"));
        assert!(!rules.has_mention("email a@b.com"));
        assert!(!rules.has_mention("<#C123|general>"));
    }

    #[test]
    fn test_custom_rules_round_trip_through_config() {
        let mut rules = SignalRules::default();
        rules
            .signals
            .insert("praise".to_string(), vec!["Thanks".to_string()]);
        let json = rules.to_json().unwrap();
        let parsed = SignalRules::parse(&json).unwrap();
        assert_eq!(parsed, rules);

        let compiled = parsed.compile().unwrap();
        assert_eq!(compiled.matching_signals("thanks a lot"), vec!["praise"]);
        assert_eq!(compiled.signal_names().count(), 3);
    }

    #[test]
    fn test_invalid_rules() {
        assert!(SignalRules::parse("not json").is_err());

        let mut rules = SignalRules::default();
        rules.checklist_open.push("([unclosed".to_string());
        let json = serde_json::to_string(&rules).unwrap();
        assert!(matches!(SignalRules::parse(&json), Err(Error::Config(_))));
    }

    #[test]
    fn test_from_config_falls_back() {
        assert_eq!(SignalRules::from_config(None), SignalRules::default());
        assert_eq!(SignalRules::from_config(Some("{oops")), SignalRules::default());
    }
}
