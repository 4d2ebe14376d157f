//! Minimal robots.txt handling: groups, Allow/Disallow with `*` and `$`,
//! Sitemap lines.

/// Rules that apply to one user agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsRules {
    allow: Vec<String>,
    disallow: Vec<String>,
    pub sitemaps: Vec<String>,
}

impl RobotsRules {
    /// Longest matching pattern wins; Allow wins a tie.
    pub fn is_allowed(&self, path: &str) -> bool {
        let longest = |patterns: &[String]| {
            patterns
                .iter()
                .filter(|p| pattern_matches(p, path))
                .map(|p| p.len())
                .max()
        };
        match (longest(&self.allow), longest(&self.disallow)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(d)) => a >= d,
        }
    }
}

/// Parse `body` keeping the group for `agent`, or the `*` group when no group
/// names it.
pub fn parse_robots(body: &str, agent: &str) -> RobotsRules {
    let agent = agent.to_lowercase();
    let mut specific = RobotsRules::default();
    let mut wildcard = RobotsRules::default();
    let mut has_specific = false;
    let mut sitemaps = Vec::new();

    // Agents named by the current group, and whether its rules have started.
    let mut group_agents: Vec<String> = Vec::new();
    let mut in_rules = false;

    for line in body.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if in_rules {
                    group_agents.clear();
                    in_rules = false;
                }
                group_agents.push(value.to_lowercase());
            }
            "allow" | "disallow" => {
                in_rules = true;
                if value.is_empty() {
                    continue;
                }
                let names_us = group_agents.iter().any(|a| a != "*" && agent.contains(a.as_str()));
                let targets = if names_us {
                    has_specific = true;
                    Some(&mut specific)
                } else if group_agents.iter().any(|a| a == "*") {
                    Some(&mut wildcard)
                } else {
                    None
                };
                if let Some(rules) = targets {
                    let list = if key == "allow" {
                        &mut rules.allow
                    } else {
                        &mut rules.disallow
                    };
                    list.push(value.to_string());
                }
            }
            "sitemap" => sitemaps.push(value.to_string()),
            _ => {}
        }
    }

    let mut rules = if has_specific { specific } else { wildcard };
    rules.sitemaps = sitemaps;
    rules
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    glob_match(pattern.as_bytes(), path.as_bytes(), anchored)
}

fn glob_match(pattern: &[u8], path: &[u8], anchored: bool) -> bool {
    match pattern.split_first() {
        None => !anchored || path.is_empty(),
        Some((b'*', rest)) => (0..=path.len()).any(|i| glob_match(rest, &path[i..], anchored)),
        Some((c, rest)) => path
            .split_first()
            .is_some_and(|(p, tail)| p == c && glob_match(rest, tail, anchored)),
    }
}
