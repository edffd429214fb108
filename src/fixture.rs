use std::collections::HashMap;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::quality::{PitcherSlot, TeamProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    Away,
    Home,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideInput {
    pub team: String,
    #[serde(default)]
    pub profile: TeamProfile,
    #[serde(default)]
    pub pitcher: PitcherSlot,
}

/// One scheduled matchup, fully resolved before it reaches the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureInput {
    /// Identifier assigned by the upstream feed.
    pub fixture_id: String,
    pub date: NaiveDate,
    pub away: SideInput,
    pub home: SideInput,
}

impl FixtureInput {
    pub fn key(&self) -> String {
        fixture_key(self.date, &self.away.team, &self.home.team)
    }

    pub fn side(&self, venue: Venue) -> &SideInput {
        match venue {
            Venue::Away => &self.away,
            Venue::Home => &self.home,
        }
    }

    pub fn side_mut(&mut self, venue: Venue) -> &mut SideInput {
        match venue {
            Venue::Away => &mut self.away,
            Venue::Home => &mut self.home,
        }
    }
}

/// `<date>|<away> @ <home>` in canonical form.
pub fn fixture_key(date: NaiveDate, away: &str, home: &str) -> String {
    canonicalize(&format!("{}|{} @ {}", date.format("%Y-%m-%d"), away, home))
}

/// Maps every spelling of a fixture key to one normal form: lower-case,
/// underscores and tabs become spaces, whitespace is collapsed, `@` and `|`
/// separators get uniform spacing, and known team aliases are folded to a
/// single team name.
pub fn canonicalize(raw: &str) -> String {
    raw.split('|')
        .map(|part| {
            part.split('@')
                .map(canonical_team)
                .collect::<Vec<_>>()
                .join(" @ ")
        })
        .collect::<Vec<_>>()
        .join("|")
}

pub fn canonical_team(raw: &str) -> String {
    let cleaned = raw
        .chars()
        .map(|c| match c {
            '_' | '\t' | '\n' | '\r' => ' ',
            c => c.to_ascii_lowercase(),
        })
        .collect::<String>();
    let words = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    match TEAM_ALIASES.get(words.as_str()) {
        Some(name) => (*name).to_string(),
        None => words,
    }
}

static TEAM_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let table: &[(&str, &[&str])] = &[
        ("athletics", &["oakland athletics", "oakland a's", "oakland as", "a's", "oak"]),
        ("angels", &["los angeles angels", "los angeles angels of anaheim", "anaheim angels", "laa"]),
        ("dodgers", &["los angeles dodgers", "la dodgers", "lad"]),
        ("yankees", &["new york yankees", "ny yankees", "nyy"]),
        ("mets", &["new york mets", "ny mets", "nym"]),
        ("white sox", &["chicago white sox", "chw", "cws"]),
        ("cubs", &["chicago cubs", "chc"]),
        ("cardinals", &["st. louis cardinals", "st louis cardinals", "saint louis cardinals", "stl"]),
        ("red sox", &["boston red sox", "bos"]),
        ("blue jays", &["toronto blue jays", "tor"]),
        ("rays", &["tampa bay rays", "tampa bay devil rays", "tb", "tbr"]),
        ("orioles", &["baltimore orioles", "bal"]),
        ("guardians", &["cleveland guardians", "cleveland indians", "cle"]),
        ("tigers", &["detroit tigers", "det"]),
        ("royals", &["kansas city royals", "kc", "kcr"]),
        ("twins", &["minnesota twins", "min"]),
        ("astros", &["houston astros", "hou"]),
        ("mariners", &["seattle mariners", "sea"]),
        ("rangers", &["texas rangers", "tex"]),
        ("braves", &["atlanta braves", "atl"]),
        ("marlins", &["miami marlins", "florida marlins", "mia"]),
        ("phillies", &["philadelphia phillies", "phi"]),
        ("nationals", &["washington nationals", "wsh", "was"]),
        ("brewers", &["milwaukee brewers", "mil"]),
        ("reds", &["cincinnati reds", "cin"]),
        ("pirates", &["pittsburgh pirates", "pit"]),
        ("diamondbacks", &["arizona diamondbacks", "ari", "d-backs", "dbacks"]),
        ("rockies", &["colorado rockies", "col"]),
        ("padres", &["san diego padres", "sd", "sdp"]),
        ("giants", &["san francisco giants", "sf", "sfg"]),
    ];
    let mut map = HashMap::new();
    for (name, aliases) in table {
        for alias in *aliases {
            map.insert(*alias, *name);
        }
    }
    map
});
