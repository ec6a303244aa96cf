//! Scripting state registry parsed from the `LSQ:` listing.

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateRegistry {
    /// `(index, name)` in advertised order.
    pub states: Vec<(i32, String)>,
    pub query_index: Option<i32>,
    pub command_index: Option<i32>,
}

impl StateRegistry {
    /// Parse alternating `index, name` tokens. Pairs with a non-numeric index
    /// are skipped; a trailing unpaired token is ignored. The first state
    /// carrying each distinguished name wins.
    pub fn parse(tokens: &[String], query_name: &str, command_name: &str) -> Self {
        let mut registry = StateRegistry::default();
        for pair in tokens.chunks_exact(2) {
            let Ok(index) = pair[0].trim().parse::<i32>() else {
                continue;
            };
            let name = pair[1].trim().to_string();
            if registry.query_index.is_none() && name == query_name {
                registry.query_index = Some(index);
            }
            if registry.command_index.is_none() && name == command_name {
                registry.command_index = Some(index);
            }
            registry.states.push((index, name));
        }
        registry
    }

    /// Both distinguished states are advertised.
    pub fn in_game(&self) -> bool {
        self.query_index.is_some() && self.command_index.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<String> {
        s.split(':').map(str::to_string).collect()
    }

    #[test]
    fn test_parse_pairs() {
        let reg = StateRegistry::parse(&tokens("0:GameCore_Tuner:1:InGame"), "GameCore_Tuner", "InGame");
        assert_eq!(reg.query_index, Some(0));
        assert_eq!(reg.command_index, Some(1));
        assert_eq!(reg.states.len(), 2);
        assert!(reg.in_game());
        assert_eq!(reg.states[1], (1, "InGame".to_string()));
    }

    #[test]
    fn test_first_occurrence_wins() {
        let reg = StateRegistry::parse(
            &tokens("3:InGame:5:GameCore_Tuner:7:InGame:9:GameCore_Tuner"),
            "GameCore_Tuner",
            "InGame",
        );
        assert_eq!(reg.query_index, Some(5));
        assert_eq!(reg.command_index, Some(3));
    }

    #[test]
    fn test_front_end_only() {
        let reg = StateRegistry::parse(&tokens("0:Main State:1:FrontEnd"), "GameCore_Tuner", "InGame");
        assert!(reg.query_index.is_none());
        assert!(reg.command_index.is_none());
        assert!(!reg.in_game());
        assert_eq!(reg.states[1].1, "FrontEnd");
    }

    #[test]
    fn test_skips_garbage() {
        let reg = StateRegistry::parse(&tokens("x:Bad:2:InGame:4"), "GameCore_Tuner", "InGame");
        assert_eq!(reg.states, vec![(2, "InGame".to_string())]);
        assert_eq!(reg.command_index, Some(2));
    }
}
