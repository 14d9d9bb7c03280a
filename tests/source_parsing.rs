use std::fs;
use std::path::PathBuf;

use mlb_datasync::source::{
    Team, parse_roster_rows, parse_stats_rows, parse_teams_json, parse_tracking_csv,
};

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

#[test]
fn parses_hitting_splits_fixture() {
    let raw = read_fixture("stats_hitting.json");
    let table = parse_stats_rows(&raw, "Season", &[("atBats", "AB")]).expect("fixture should parse");
    assert_eq!(table.rows.len(), 2);
    assert_eq!(
        &table.columns[..4],
        &[
            "Season".to_string(),
            "Name".to_string(),
            "player_id".to_string(),
            "Team".to_string()
        ]
    );

    let season = table.column_index("Season").expect("season column");
    let name = table.column_index("Name").expect("name column");
    let ab = table.column_index("AB").expect("renamed AB column");
    assert!(table.column_index("atBats").is_none());
    assert_eq!(table.rows[0][season], "2024");
    assert_eq!(table.rows[0][name], "Sho Tani");
    assert_eq!(table.rows[0][ab], "550");

    // The second split lacks "obp"; its cell is blank, not misaligned.
    let obp = table.column_index("obp").expect("obp column");
    assert_eq!(table.rows[0][obp], ".390");
    assert_eq!(table.rows[1][obp], "");
}

#[test]
fn stats_null_and_empty_are_empty_tables() {
    assert!(
        parse_stats_rows("null", "Season", &[])
            .expect("null should parse")
            .is_empty()
    );
    assert!(
        parse_stats_rows("", "Season", &[])
            .expect("empty should parse")
            .is_empty()
    );
}

#[test]
fn parses_teams_fixture_excluding_spring_and_other_sports() {
    let raw = read_fixture("teams.json");
    let teams = parse_teams_json(&raw).expect("fixture should parse");
    assert_eq!(teams.len(), 2);
    assert_eq!(teams[0].id, 119);
    assert_eq!(teams[0].abbrev, "LAD");
    assert_eq!(teams[1].name, "Los Angeles Angels");
}

#[test]
fn parses_roster_fixture_dropping_idless_entries() {
    let raw = read_fixture("roster.json");
    let team = Team {
        id: 119,
        name: "Los Angeles Dodgers".to_string(),
        abbrev: "LAD".to_string(),
    };
    let rows = parse_roster_rows(&raw, 2024, &team).expect("fixture should parse");
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0],
        vec![
            "2024".to_string(),
            "119".to_string(),
            "660271".to_string(),
            "Sho Tani".to_string(),
            "10".to_string(),
            "Designated Hitter".to_string(),
            "Hitter".to_string(),
            "Los Angeles Dodgers".to_string(),
            "LAD".to_string(),
        ]
    );
    // Second entry has no position code; the abbreviation stands in.
    assert_eq!(rows[1][4], "P");
}

#[test]
fn parses_tracking_leaderboard_fixture() {
    let raw = read_fixture("tracking_leaderboard.csv");
    let table = parse_tracking_csv(&raw).expect("fixture should parse");
    assert_eq!(table.rows.len(), 2);
    let year = table.column_index("year").expect("year column");
    let player = table.column_index("player_id").expect("player_id column");
    assert_eq!(table.rows[0][year], "2024");
    assert_eq!(table.rows[1][player], "545361");
    assert_eq!(table.rows[0][0], "Tani, Sho");
}
