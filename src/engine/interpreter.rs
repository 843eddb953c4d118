//! Market interpreter — free-text market/selection against a final score.
//!
//! Pure and deterministic. Rules are tried in order and the first one that
//! recognises the selection decides:
//!
//! 1. match not finished (FT/AET/PEN) → undetermined
//! 2. both-teams-to-score
//! 3. over/under total goals
//! 4. double chance
//! 5. single outcome (1N2)
//!
//! Anything no rule recognises is `Verdict::Undetermined`, which sends the
//! wager to the fallback oracle. The interpreter never guesses.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::{normalize_text as normalize, MatchResult, MatchWinner, Verdict, Wager};

/// Line assumed for an over/under market whose text carries no number.
pub const DEFAULT_GOAL_LINE: Decimal = dec!(2.5);

/// Markets on statistics other than full-time goals. A structured score
/// cannot settle these, so they always go to the oracle.
const NON_GOAL_MARKERS: &[&str] = &[
    "corner", "card", "carton", "booking", "shot", "tirs", "foul", "faute",
    "offside", "hors-jeu", "hors jeu", "possession", "half", "mi-temps",
    "1st", "2nd", "player", "joueur", "buteur", "scorer", "handicap",
    "exact score", "score exact", "correct score", "score correct",
];

const BTTS_MARKERS: &[&str] = &[
    "btts", "both teams to score", "both teams score", "deux equipes marquent", "les deux",
];
/// Direction words, matched as whole words ("plus"/"moins" only when
/// followed by "de").
const OVER_WORDS: &[&[&str]] = &[&["over"], &["plus", "de"]];
const UNDER_WORDS: &[&[&str]] = &[&["under"], &["moins", "de"]];
/// Market words naming a goal-total market without a direction.
const TOTAL_WORDS: &[&str] = &["total", "totals"];
const DOUBLE_CHANCE_MARKERS: &[&str] = &["double chance", "chance double"];
const DRAW_MARKERS: &[&str] = &["nul", "draw"];

/// Characters of a normalised team name that must appear in a selection
/// to count as naming that team.
const DOUBLE_CHANCE_PREFIX: usize = 4;
const SINGLE_OUTCOME_PREFIX: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Over,
    Under,
}

/// Maps a wager and a structured match result to a verdict.
#[derive(Debug, Clone)]
pub struct MarketInterpreter {
    /// `None` makes over/under wagers without a numeric line undetermined.
    default_goal_line: Option<Decimal>,
}

impl Default for MarketInterpreter {
    fn default() -> Self {
        Self {
            default_goal_line: Some(DEFAULT_GOAL_LINE),
        }
    }
}

impl MarketInterpreter {
    pub fn new(default_goal_line: Option<Decimal>) -> Self {
        Self { default_goal_line }
    }

    /// Decide `wager` against `result`.
    pub fn interpret(&self, wager: &Wager, result: &MatchResult) -> Verdict {
        if !result.status.is_finished() {
            return Verdict::Undetermined;
        }
        let Some((home_goals, away_goals)) = result.score() else {
            return Verdict::Undetermined;
        };

        let market = normalize(&wager.market);
        let selection = normalize(&wager.selection);

        if contains_any(&market, NON_GOAL_MARKERS) || contains_any(&selection, NON_GOAL_MARKERS) {
            return Verdict::Undetermined;
        }

        let teams = Teams {
            home: [normalize(&result.home_team), normalize(&wager.home_team)],
            away: [normalize(&result.away_team), normalize(&wager.away_team)],
        };

        if let Some(verdict) = both_teams_to_score(&market, &selection, home_goals, away_goals) {
            return verdict;
        }
        if is_goal_total_market(&market) {
            return self
                .goal_totals(&market, &selection, home_goals + away_goals)
                .unwrap_or(Verdict::Undetermined);
        }

        double_chance(&market, &selection, &teams, result.winner)
            .or_else(|| single_outcome(&selection, &teams, result.winner))
            .unwrap_or(Verdict::Undetermined)
    }

    /// Over/under on total goals. Equality with the line loses both ways.
    fn goal_totals(&self, market: &str, selection: &str, total_goals: u32) -> Option<Verdict> {
        // A selection naming a direction decides it, even ambiguously.
        let direction = if mentions_direction(selection) {
            direction_of(selection)
        } else {
            direction_of(market)
        }?;

        let line = extract_line(selection)
            .or_else(|| extract_line(market))
            .or(self.default_goal_line)?;

        let total = Decimal::from(total_goals);
        Some(match direction {
            Direction::Over => Verdict::from_bool(total > line),
            Direction::Under => Verdict::from_bool(total < line),
        })
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct Teams {
    /// Provider name first, then the name stored on the wager.
    home: [String; 2],
    away: [String; 2],
}

fn both_teams_to_score(market: &str, selection: &str, home: u32, away: u32) -> Option<Verdict> {
    if !contains_any(market, BTTS_MARKERS) {
        return None;
    }
    let both_scored = home > 0 && away > 0;
    let words = words(selection);
    let yes = words.iter().any(|w| *w == "yes" || *w == "oui");
    let no = words.iter().any(|w| *w == "no" || *w == "non");

    match (yes, no) {
        (true, false) => Some(Verdict::from_bool(both_scored)),
        (false, true) => Some(Verdict::from_bool(!both_scored)),
        _ => None,
    }
}

fn double_chance(market: &str, selection: &str, teams: &Teams, winner: MatchWinner) -> Option<Verdict> {
    if !contains_any(market, DOUBLE_CHANCE_MARKERS) {
        return None;
    }
    let compact: String = selection.chars().filter(|c| c.is_alphanumeric()).collect();
    let draw = contains_any(selection, DRAW_MARKERS);

    if compact.contains("1x") || (draw && names_team(selection, &teams.home, DOUBLE_CHANCE_PREFIX)) {
        return Some(Verdict::from_bool(winner != MatchWinner::Away));
    }
    if compact.contains("x2") || (draw && names_team(selection, &teams.away, DOUBLE_CHANCE_PREFIX)) {
        return Some(Verdict::from_bool(winner != MatchWinner::Home));
    }
    if compact.contains("12") {
        return Some(Verdict::from_bool(winner != MatchWinner::Draw));
    }
    None
}

fn single_outcome(selection: &str, teams: &Teams, winner: MatchWinner) -> Option<Verdict> {
    let words = words(selection);
    let home = selection == "1"
        || words.iter().any(|w| *w == "home" || *w == "domicile")
        || names_team(selection, &teams.home, SINGLE_OUTCOME_PREFIX);
    let away = selection == "2"
        || words.iter().any(|w| *w == "away" || *w == "exterieur")
        || names_team(selection, &teams.away, SINGLE_OUTCOME_PREFIX);
    let draw = selection == "n" || selection == "x" || contains_any(selection, DRAW_MARKERS);

    // A selection naming more than one outcome is not a 1N2 pick.
    match (home, away, draw) {
        (true, false, false) => Some(Verdict::from_bool(winner == MatchWinner::Home)),
        (false, true, false) => Some(Verdict::from_bool(winner == MatchWinner::Away)),
        (false, false, true) => Some(Verdict::from_bool(winner == MatchWinner::Draw)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

fn words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

fn has_phrase(words: &[&str], phrases: &[&[&str]]) -> bool {
    phrases
        .iter()
        .any(|phrase| words.windows(phrase.len()).any(|w| w == *phrase))
}

fn mentions_direction(text: &str) -> bool {
    let words = words(text);
    has_phrase(&words, OVER_WORDS) || has_phrase(&words, UNDER_WORDS)
}

/// Over/under markets are recognised from the market text only; a team
/// name in the selection ("Sunderland", "Hannover") never makes one.
fn is_goal_total_market(market: &str) -> bool {
    mentions_direction(market) || words(market).iter().any(|w| TOTAL_WORDS.contains(w))
}

fn direction_of(text: &str) -> Option<Direction> {
    let words = words(text);
    match (has_phrase(&words, OVER_WORDS), has_phrase(&words, UNDER_WORDS)) {
        (true, false) => Some(Direction::Over),
        (false, true) => Some(Direction::Under),
        _ => None,
    }
}

/// Whether `selection` contains the first `len` characters of any of the
/// given (already normalised) team names.
fn names_team(selection: &str, names: &[String], len: usize) -> bool {
    names.iter().any(|name| {
        let prefix: String = name.chars().take(len).collect();
        !prefix.trim().is_empty() && selection.contains(prefix.as_str())
    })
}

/// First decimal number in the text ("2.5", "2,5", "3").
fn extract_line(text: &str) -> Option<Decimal> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let raw: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    raw.trim_end_matches('.').parse::<Decimal>().ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FixtureStatus;

    fn verdict(market: &str, selection: &str, home: u32, away: u32) -> Verdict {
        MarketInterpreter::default().interpret(
            &Wager::sample(market, selection),
            &MatchResult::finished(home, away),
        )
    }

    // -- Match state --

    #[test]
    fn test_unfinished_match_is_undetermined() {
        let mut result = MatchResult::finished(3, 1);
        for code in ["NS", "1H", "HT", "2H", "PST", "CANC"] {
            result.status = FixtureStatus::from_code(code);
            let v = MarketInterpreter::default()
                .interpret(&Wager::sample("Over/Under", "Over 2.5"), &result);
            assert_eq!(v, Verdict::Undetermined, "status {code}");
        }
    }

    #[test]
    fn test_finished_codes_are_decided() {
        let mut result = MatchResult::finished(3, 1);
        for code in ["FT", "AET", "PEN"] {
            result.status = FixtureStatus::from_code(code);
            let v = MarketInterpreter::default()
                .interpret(&Wager::sample("Over/Under", "Over 2.5"), &result);
            assert_eq!(v, Verdict::Won, "status {code}");
        }
    }

    #[test]
    fn test_missing_goals_is_undetermined() {
        let mut result = MatchResult::finished(1, 0);
        result.away_goals = None;
        let v = MarketInterpreter::default().interpret(&Wager::sample("1N2", "1"), &result);
        assert_eq!(v, Verdict::Undetermined);
    }

    // -- Both teams to score --

    #[test]
    fn test_btts_yes() {
        assert_eq!(verdict("BTTS", "Oui", 2, 1), Verdict::Won);
        assert_eq!(verdict("BTTS", "Oui", 2, 0), Verdict::Lost);
        assert_eq!(verdict("Both Teams To Score", "Yes", 1, 1), Verdict::Won);
    }

    #[test]
    fn test_btts_no() {
        assert_eq!(verdict("BTTS", "Non", 2, 0), Verdict::Won);
        assert_eq!(verdict("BTTS", "No", 1, 1), Verdict::Lost);
        assert_eq!(verdict("Les deux équipes marquent", "NON", 0, 0), Verdict::Won);
    }

    #[test]
    fn test_btts_unrecognised_selection_is_undetermined() {
        assert_eq!(verdict("BTTS", "Peut-être", 1, 1), Verdict::Undetermined);
    }

    // -- Over / under --

    #[test]
    fn test_over_line_from_selection() {
        assert_eq!(verdict("Over/Under", "Over 2.5", 3, 1), Verdict::Won);
        assert_eq!(verdict("Over/Under", "Over 2.5", 1, 1), Verdict::Lost);
        assert_eq!(verdict("Over/Under", "Over 3.5", 2, 1), Verdict::Lost);
    }

    #[test]
    fn test_under_selection_on_combined_market() {
        assert_eq!(verdict("Over/Under", "Under 2.5", 1, 1), Verdict::Won);
        assert_eq!(verdict("Over/Under", "Under 2.5", 3, 1), Verdict::Lost);
    }

    #[test]
    fn test_line_from_market_text() {
        assert_eq!(verdict("Over 1.5 goals", "Yes", 1, 1), Verdict::Won);
        assert_eq!(verdict("Moins de 3,5 buts", "Oui", 2, 2), Verdict::Lost);
        assert_eq!(verdict("Plus de 2,5 buts", "Plus de 2,5", 2, 1), Verdict::Won);
    }

    #[test]
    fn test_default_line() {
        assert_eq!(verdict("Over", "Over", 2, 1), Verdict::Won);
        assert_eq!(verdict("Under", "Under", 2, 1), Verdict::Lost);
    }

    #[test]
    fn test_no_default_line_is_undetermined() {
        let interpreter = MarketInterpreter::new(None);
        let v = interpreter.interpret(&Wager::sample("Over", "Over"), &MatchResult::finished(2, 1));
        assert_eq!(v, Verdict::Undetermined);
        let v = interpreter.interpret(&Wager::sample("Over", "Over 2.5"), &MatchResult::finished(2, 1));
        assert_eq!(v, Verdict::Won);
    }

    #[test]
    fn test_exact_line_loses_both_ways() {
        assert_eq!(verdict("Over/Under 3", "Over 3", 2, 1), Verdict::Lost);
        assert_eq!(verdict("Over/Under 3", "Under 3", 2, 1), Verdict::Lost);
    }

    #[test]
    fn test_ambiguous_direction_is_undetermined() {
        assert_eq!(verdict("Over/Under", "2.5", 3, 1), Verdict::Undetermined);
    }

    // -- Double chance --

    #[test]
    fn test_double_chance_codes() {
        assert_eq!(verdict("Double Chance", "1X", 1, 1), Verdict::Won);
        assert_eq!(verdict("Double Chance", "1X", 0, 1), Verdict::Lost);
        assert_eq!(verdict("Double Chance", "X2", 0, 1), Verdict::Won);
        assert_eq!(verdict("Double Chance", "X2", 2, 1), Verdict::Lost);
        assert_eq!(verdict("Double Chance", "12", 2, 1), Verdict::Won);
        assert_eq!(verdict("Double Chance", "1 2", 1, 1), Verdict::Lost);
    }

    #[test]
    fn test_double_chance_team_names() {
        assert_eq!(verdict("Double chance", "Paris ou Nul", 0, 0), Verdict::Won);
        assert_eq!(verdict("Double chance", "Lyon or draw", 2, 0), Verdict::Lost);
    }

    // -- 1N2 --

    #[test]
    fn test_single_outcome_codes() {
        assert_eq!(verdict("1N2", "1", 2, 0), Verdict::Won);
        assert_eq!(verdict("1N2", "1", 0, 0), Verdict::Lost);
        assert_eq!(verdict("1N2", "2", 0, 1), Verdict::Won);
        assert_eq!(verdict("1N2", "N", 1, 1), Verdict::Won);
        assert_eq!(verdict("1N2", "X", 1, 0), Verdict::Lost);
        assert_eq!(verdict("Résultat", "Match nul", 2, 2), Verdict::Won);
    }

    #[test]
    fn test_single_outcome_team_names() {
        assert_eq!(verdict("1N2", "Victoire Paris", 3, 0), Verdict::Won);
        assert_eq!(verdict("Match Winner", "Lyon", 3, 0), Verdict::Lost);
        assert_eq!(verdict("Match Winner", "Olympique Lyonnais", 0, 1), Verdict::Won);
    }

    #[test]
    fn test_single_outcome_penalty_winner() {
        let mut result = MatchResult::finished(1, 1);
        result.status = FixtureStatus::AfterPenalties;
        result.winner = MatchWinner::Away;
        let v = MarketInterpreter::default().interpret(&Wager::sample("1N2", "2"), &result);
        assert_eq!(v, Verdict::Won);
    }

    #[test]
    fn test_multiple_outcomes_named_is_undetermined() {
        assert_eq!(verdict("Winner", "Paris or Lyon", 1, 0), Verdict::Undetermined);
        assert_eq!(verdict("Winner", "Paris or draw", 1, 0), Verdict::Undetermined);
    }

    fn verdict_between(
        home_team: &str,
        away_team: &str,
        market: &str,
        selection: &str,
        score: (u32, u32),
    ) -> Verdict {
        let mut wager = Wager::sample(market, selection);
        wager.home_team = home_team.to_string();
        wager.away_team = away_team.to_string();
        let mut result = MatchResult::finished(score.0, score.1);
        result.home_team = home_team.to_string();
        result.away_team = away_team.to_string();
        MarketInterpreter::default().interpret(&wager, &result)
    }

    #[test]
    fn test_team_names_containing_direction_words() {
        assert_eq!(
            verdict_between("Sunderland", "Leeds United", "1N2", "Sunderland", (3, 0)),
            Verdict::Won
        );
        assert_eq!(
            verdict_between("Hannover 96", "Hamburger SV", "1N2", "Hannover 96", (2, 1)),
            Verdict::Won
        );
        assert_eq!(
            verdict_between("Sunderland", "Leeds United", "Double Chance", "Sunderland ou Nul", (2, 2)),
            Verdict::Won
        );
        assert_eq!(
            verdict_between("Andover", "Basingstoke", "Match Winner", "Andover", (0, 1)),
            Verdict::Lost
        );
    }

    #[test]
    fn test_goal_total_needs_market_marker() {
        // Direction words in the selection alone do not make a goal-total bet.
        assert_eq!(verdict("Special", "Over 2.5", 3, 1), Verdict::Undetermined);
        assert_eq!(verdict("Total buts", "Plus de 2,5", 2, 1), Verdict::Won);
        assert_eq!(verdict("Over/Under", "Overall", 3, 1), Verdict::Undetermined);
    }

    // -- Fail closed --

    #[test]
    fn test_corners_market_is_undetermined() {
        assert_eq!(verdict("Corners Over 9.5", "Over 9.5", 3, 1), Verdict::Undetermined);
        assert_eq!(verdict("Corners Over 9.5", "Oui", 0, 0), Verdict::Undetermined);
    }

    #[test]
    fn test_unrecognised_triples_never_decide() {
        let markets = [
            "Cartons jaunes", "First goalscorer", "Handicap -1", "Half-time result",
            "Score exact", "Mi-temps / Fin de match", "Total shots", "Something else",
        ];
        let selections = ["Over 4.5", "Mbappé", "PSG -1", "1", "2-1", "Oui", "Plus de 10"];
        for market in markets {
            for selection in selections {
                for (h, a) in [(0, 0), (1, 0), (0, 2), (3, 3)] {
                    let v = verdict(market, selection, h, a);
                    if market == "Something else" {
                        continue;
                    }
                    assert_eq!(v, Verdict::Undetermined, "{market} / {selection} / {h}-{a}");
                }
            }
        }
    }

    #[test]
    fn test_free_text_without_rule_is_undetermined() {
        assert_eq!(verdict("Special", "Le gardien arrête un penalty", 1, 0), Verdict::Undetermined);
        assert_eq!(verdict("", "", 1, 0), Verdict::Undetermined);
    }

    // -- Helpers --

    #[test]
    fn test_extract_line() {
        assert_eq!(extract_line("over 2.5"), Some(dec!(2.5)));
        assert_eq!(extract_line("plus de 3,5 buts"), Some(dec!(3.5)));
        assert_eq!(extract_line("over 3."), Some(dec!(3)));
        assert_eq!(extract_line("over"), None);
    }
}
