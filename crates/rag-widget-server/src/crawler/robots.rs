/// Minimal robots.txt evaluation: user-agent groups, allow/disallow rules,
/// longest-match precedence with allow winning ties.

#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Clone)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    groups: Vec<Group>,
}

impl RobotsTxt {
    pub fn parse(content: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut current: Option<Group> = None;
        let mut last_was_agent = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !last_was_agent {
                        if let Some(group) = current.take() {
                            groups.push(group);
                        }
                        current = Some(Group {
                            agents: Vec::new(),
                            rules: Vec::new(),
                        });
                    }
                    if let Some(group) = current.as_mut() {
                        group.agents.push(value.to_ascii_lowercase());
                    }
                    last_was_agent = true;
                }
                "allow" | "disallow" => {
                    last_was_agent = false;
                    if let Some(group) = current.as_mut() {
                        // An empty Disallow means "everything allowed".
                        if value.is_empty() {
                            continue;
                        }
                        group.rules.push(Rule {
                            allow: key == "allow",
                            pattern: value.to_string(),
                        });
                    }
                }
                _ => {
                    last_was_agent = false;
                }
            }
        }
        if let Some(group) = current.take() {
            groups.push(group);
        }

        Self { groups }
    }

    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let ua = user_agent.to_ascii_lowercase();

        // Most specific matching group wins: our UA token beats `*`.
        let group = self
            .groups
            .iter()
            .filter_map(|g| {
                g.agents
                    .iter()
                    .filter(|a| a.as_str() == "*" || ua.contains(a.as_str()))
                    .map(|a| a.len())
                    .max()
                    .map(|specificity| (specificity, g))
            })
            .max_by_key(|(specificity, _)| *specificity)
            .map(|(_, g)| g);

        let Some(group) = group else {
            return true;
        };

        let mut best: Option<(usize, bool)> = None;
        for rule in &group.rules {
            if let Some(len) = pattern_match(&rule.pattern, path) {
                match best {
                    Some((best_len, best_allow)) => {
                        if len > best_len || (len == best_len && rule.allow && !best_allow) {
                            best = Some((len, rule.allow));
                        }
                    }
                    None => best = Some((len, rule.allow)),
                }
            }
        }

        best.map(|(_, allow)| allow).unwrap_or(true)
    }
}

/// Prefix match with `*` wildcards and a `$` end anchor. Returns the pattern
/// length as specificity when it matches.
fn pattern_match(pattern: &str, path: &str) -> Option<usize> {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let mut remainder = path;
    let mut first = true;
    for part in pattern.split('*') {
        if part.is_empty() {
            first = false;
            continue;
        }
        if first {
            remainder = remainder.strip_prefix(part)?;
            first = false;
        } else {
            let idx = remainder.find(part)?;
            remainder = &remainder[idx + part.len()..];
        }
    }

    if anchored && !remainder.is_empty() {
        return None;
    }
    Some(pattern.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
User-agent: *\n\
Disallow: /private/\n\
Allow: /private/docs/\n\
\n\
User-agent: rag-widget-bot\n\
Disallow: /internal/\n";

    #[test]
    fn wildcard_group_applies_to_unknown_agents() {
        let robots = RobotsTxt::parse(SAMPLE);
        assert!(!robots.is_allowed("somebot/1.0", "/private/page"));
        assert!(robots.is_allowed("somebot/1.0", "/public/page"));
    }

    #[test]
    fn longest_match_wins_and_allow_breaks_ties() {
        let robots = RobotsTxt::parse(SAMPLE);
        assert!(robots.is_allowed("somebot/1.0", "/private/docs/intro"));
    }

    #[test]
    fn specific_agent_group_overrides_wildcard() {
        let robots = RobotsTxt::parse(SAMPLE);
        assert!(!robots.is_allowed("rag-widget-bot/0.1", "/internal/x"));
        // The specific group has no /private/ rule.
        assert!(robots.is_allowed("rag-widget-bot/0.1", "/private/page"));
    }

    #[test]
    fn empty_robots_allows_everything() {
        let robots = RobotsTxt::parse("");
        assert!(robots.is_allowed("anybot", "/anything"));
    }

    #[test]
    fn star_and_anchor_patterns() {
        let robots = RobotsTxt::parse("User-agent: *\nDisallow: /*.pdf$\n");
        assert!(!robots.is_allowed("bot", "/files/report.pdf"));
        assert!(robots.is_allowed("bot", "/files/report.pdf.html"));
    }
}
