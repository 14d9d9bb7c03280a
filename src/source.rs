use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;

use crate::datasets::{DatasetDescriptor, SourceKind};
use crate::fetch::{get_text, http_client};
use crate::table::{RowTable, SchemaError};

pub const DEFAULT_STATS_API_BASE: &str = "https://statsapi.mlb.com/api/v1";
pub const DEFAULT_TRACKING_BASE: &str = "https://baseballsavant.mlb.com";

const SPORT_ID: u32 = 1;

/// Season-stat payload keys renamed to the column names the files have always
/// carried.
const RENAME_HITTING: &[(&str, &str)] = &[("atBats", "AB")];
const RENAME_PITCHING: &[(&str, &str)] = &[("inningsPitched", "IP")];

/// One season's worth of rows for one dataset. Implemented over HTTP in
/// production and by canned tables in tests.
pub trait StatsSource {
    fn fetch_season(&self, ds: &DatasetDescriptor, season: i32) -> Result<RowTable>;
}

/// The league stats APIs: season splits for batting/pitching, a teams→roster
/// walk for position assignments, a leaderboard CSV for tracking metrics.
pub struct MlbStatsSource {
    pub api_base: String,
    pub tracking_base: String,
}

impl MlbStatsSource {
    pub fn from_env() -> Self {
        let api_base = std::env::var("SYNC_STATS_API_BASE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_STATS_API_BASE.to_string());
        let tracking_base = std::env::var("SYNC_TRACKING_BASE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TRACKING_BASE.to_string());
        Self {
            api_base,
            tracking_base,
        }
    }

    fn fetch_group_season(
        &self,
        ds: &DatasetDescriptor,
        group: &str,
        rename: &[(&str, &str)],
        season: i32,
    ) -> Result<RowTable> {
        let client = http_client()?;
        let url = format!(
            "{}/stats?stats=season&group={group}&season={season}&playerPool=all&limit=5000",
            self.api_base
        );
        let body = get_text(client, &url)
            .map_err(anyhow::Error::from)
            .with_context(|| format!("{} season {season}", ds.name))?;
        parse_stats_rows(&body, ds.season_column, rename)
            .with_context(|| format!("{} season {season}", ds.name))
    }

    fn fetch_rosters_season(&self, season: i32) -> Result<RowTable> {
        let client = http_client()?;
        let teams_url = format!("{}/teams?sportId={SPORT_ID}&season={season}", self.api_base);
        let body = get_text(client, &teams_url)
            .map_err(anyhow::Error::from)
            .with_context(|| format!("teams for season {season}"))?;
        let teams = parse_teams_json(&body)?;
        if teams.is_empty() {
            return Ok(RowTable::new(roster_columns()));
        }

        let mut table = RowTable::new(roster_columns());
        let mut rng = rand::thread_rng();
        for team in &teams {
            let roster_url = format!(
                "{}/teams/{}/roster/fullRoster?season={season}",
                self.api_base, team.id
            );
            let body = get_text(client, &roster_url)
                .map_err(anyhow::Error::from)
                .with_context(|| format!("roster of team {} season {season}", team.id))?;
            for row in parse_roster_rows(&body, season, team)? {
                table.push_row(row);
            }
            // Stay under the roster endpoint's rate limit.
            std::thread::sleep(Duration::from_millis(50 + rng.gen_range(0..50)));
        }
        dedup_roster_rows(&mut table);
        Ok(table)
    }

    fn fetch_tracking_season(&self, season: i32) -> Result<RowTable> {
        let client = http_client()?;
        let url = format!(
            "{}/leaderboard/expected_statistics?type=batter&year={season}&position=&team=&min=1&csv=true",
            self.tracking_base
        );
        let body = get_text(client, &url)
            .map_err(anyhow::Error::from)
            .with_context(|| format!("tracking leaderboard season {season}"))?;
        parse_tracking_csv(&body).with_context(|| format!("tracking season {season}"))
    }
}

impl StatsSource for MlbStatsSource {
    fn fetch_season(&self, ds: &DatasetDescriptor, season: i32) -> Result<RowTable> {
        match ds.source {
            SourceKind::Batting => self.fetch_group_season(ds, "hitting", RENAME_HITTING, season),
            SourceKind::Pitching => {
                self.fetch_group_season(ds, "pitching", RENAME_PITCHING, season)
            }
            SourceKind::Rosters => self.fetch_rosters_season(season),
            SourceKind::Tracking => self.fetch_tracking_season(season),
        }
    }
}

/// What one dataset's fetch pass produced, after filtering.
#[derive(Debug, Clone)]
pub struct FetchedBatch {
    pub table: RowTable,
    /// Rows dropped by the dataset's row filter.
    pub rows_filtered_out: usize,
    /// The filter column was absent, so the filter was skipped.
    pub filter_column_missing: bool,
    /// Rows outside the requested season set (the upstream may return more).
    pub out_of_range_rows: usize,
}

/// Fetch every requested season for a dataset and assemble one table. Rows
/// for seasons that were not requested are discarded; the dataset's row
/// filter runs before returning.
pub fn fetch_seasons(
    source: &dyn StatsSource,
    ds: &DatasetDescriptor,
    seasons: &[i32],
) -> Result<FetchedBatch> {
    let mut table = RowTable::default();
    for &season in seasons {
        let chunk = source.fetch_season(ds, season)?;
        append_table(ds, &mut table, chunk)?;
    }

    let requested: BTreeSet<i32> = seasons.iter().copied().collect();
    let mut out_of_range_rows = 0usize;
    if let Some(idx) = table.column_index(ds.season_column) {
        let before = table.rows.len();
        table.rows.retain(|row| {
            match row.get(idx).and_then(|cell| crate::table::parse_season(cell)) {
                Some(season) => requested.contains(&season),
                // Unparsable seasons are the reconciler's to count and drop.
                None => true,
            }
        });
        out_of_range_rows = before - table.rows.len();
    }

    let mut rows_filtered_out = 0usize;
    let mut filter_column_missing = false;
    if let Some(filter) = &ds.row_filter {
        match filter.retain(&mut table) {
            Some(dropped) => rows_filtered_out = dropped,
            None => filter_column_missing = !table.columns.is_empty(),
        }
    }

    Ok(FetchedBatch {
        table,
        rows_filtered_out,
        filter_column_missing,
        out_of_range_rows,
    })
}

/// Append a per-season chunk, realigning columns by name. Seasons of one
/// dataset must share a column set; drift between them is fatal.
fn append_table(ds: &DatasetDescriptor, acc: &mut RowTable, chunk: RowTable) -> Result<()> {
    if chunk.columns.is_empty() {
        return Ok(());
    }
    if acc.columns.is_empty() {
        *acc = chunk;
        return Ok(());
    }
    if acc.columns == chunk.columns {
        acc.rows.extend(chunk.rows);
        return Ok(());
    }
    let a: BTreeSet<&String> = acc.columns.iter().collect();
    let b: BTreeSet<&String> = chunk.columns.iter().collect();
    if a != b {
        return Err(SchemaError(format!(
            "{}: column set changed between season payloads",
            ds.name
        ))
        .into());
    }
    let mapping: Vec<usize> = acc
        .columns
        .iter()
        .map(|c| {
            chunk
                .columns
                .iter()
                .position(|cc| cc == c)
                .expect("column sets verified equal")
        })
        .collect();
    for row in chunk.rows {
        acc.rows.push(
            mapping
                .iter()
                .map(|&idx| row.get(idx).cloned().unwrap_or_default())
                .collect(),
        );
    }
    Ok(())
}

/// Flatten a season-stats payload (`stats[].splits[]`) into a table. The stat
/// map's keys become columns, renamed per `rename`, with the identity columns
/// up front.
pub fn parse_stats_rows(
    raw: &str,
    season_column: &str,
    rename: &[(&str, &str)],
) -> Result<RowTable> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(RowTable::default());
    }
    let value: Value = serde_json::from_str(trimmed).context("invalid stats json")?;

    let mut records: Vec<(String, String, String, String, BTreeMap<String, String>)> = Vec::new();
    let mut stat_keys = BTreeSet::new();

    let groups = value
        .get("stats")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("missing stats array"))?;
    for group in groups {
        let Some(splits) = group.get("splits").and_then(|v| v.as_array()) else {
            continue;
        };
        for split in splits {
            let Some(season) = split.get("season").map(value_to_cell) else {
                continue;
            };
            let player = split.get("player");
            let name = player
                .and_then(|p| p.get("fullName"))
                .map(value_to_cell)
                .unwrap_or_default();
            let player_id = player
                .and_then(|p| p.get("id"))
                .map(value_to_cell)
                .unwrap_or_default();
            let team = split
                .get("team")
                .and_then(|t| t.get("name"))
                .map(value_to_cell)
                .unwrap_or_default();

            let mut stats = BTreeMap::new();
            if let Some(map) = split.get("stat").and_then(|s| s.as_object()) {
                for (key, cell) in map {
                    let key = rename
                        .iter()
                        .find(|(from, _)| *from == key.as_str())
                        .map(|(_, to)| (*to).to_string())
                        .unwrap_or_else(|| key.clone());
                    stats.insert(key, value_to_cell(cell));
                }
            }
            stat_keys.extend(stats.keys().cloned());
            records.push((season, name, player_id, team, stats));
        }
    }

    if records.is_empty() {
        return Ok(RowTable::default());
    }

    let mut columns = vec![
        season_column.to_string(),
        "Name".to_string(),
        "player_id".to_string(),
        "Team".to_string(),
    ];
    columns.extend(stat_keys.iter().cloned());

    let mut table = RowTable::new(columns);
    for (season, name, player_id, team, stats) in records {
        let mut row = vec![season, name, player_id, team];
        for key in &stat_keys {
            row.push(stats.get(key).cloned().unwrap_or_default());
        }
        table.push_row(row);
    }
    Ok(table)
}

#[derive(Debug, Clone)]
pub struct Team {
    pub id: u32,
    pub name: String,
    pub abbrev: String,
}

#[derive(Debug, Deserialize)]
struct TeamsResponse {
    #[serde(default)]
    teams: Vec<TeamEntry>,
}

#[derive(Debug, Deserialize)]
struct TeamEntry {
    id: Option<u32>,
    name: Option<String>,
    #[serde(default)]
    abbreviation: Option<String>,
    #[serde(default)]
    sport: Option<SportRef>,
    #[serde(default, rename = "springOnly")]
    spring_only: bool,
}

#[derive(Debug, Deserialize)]
struct SportRef {
    id: Option<u32>,
}

/// League teams for a season, spring-training-only entries excluded.
pub fn parse_teams_json(raw: &str) -> Result<Vec<Team>> {
    let parsed: TeamsResponse = serde_json::from_str(raw.trim()).context("invalid teams json")?;
    let mut out = Vec::new();
    for entry in parsed.teams {
        if entry.spring_only {
            continue;
        }
        if entry.sport.as_ref().and_then(|s| s.id) != Some(SPORT_ID) {
            continue;
        }
        let Some(id) = entry.id else { continue };
        out.push(Team {
            id,
            name: entry.name.unwrap_or_default(),
            abbrev: entry.abbreviation.unwrap_or_default(),
        });
    }
    Ok(out)
}

#[derive(Debug, Deserialize)]
struct RosterResponse {
    #[serde(default)]
    roster: Vec<RosterEntry>,
}

#[derive(Debug, Deserialize)]
struct RosterEntry {
    person: Option<Person>,
    position: Option<Position>,
}

#[derive(Debug, Deserialize)]
struct Person {
    id: Option<u64>,
    #[serde(rename = "fullName")]
    full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Position {
    code: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    abbreviation: Option<String>,
}

fn roster_columns() -> Vec<String> {
    [
        "season",
        "team_id",
        "player_id",
        "player_name",
        "position_code",
        "position_name",
        "position_type",
        "team_name",
        "team_abbrev",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// One team's full roster as rows in [`roster_columns`] order. Entries
/// without a player id are dropped.
pub fn parse_roster_rows(raw: &str, season: i32, team: &Team) -> Result<Vec<Vec<String>>> {
    let parsed: RosterResponse =
        serde_json::from_str(raw.trim()).context("invalid roster json")?;
    let mut out = Vec::new();
    for entry in parsed.roster {
        let Some(player_id) = entry.person.as_ref().and_then(|p| p.id) else {
            continue;
        };
        let player_name = entry
            .person
            .as_ref()
            .and_then(|p| p.full_name.clone())
            .unwrap_or_default();
        let position = entry.position.as_ref();
        let position_code = position
            .and_then(|p| p.code.clone().or_else(|| p.abbreviation.clone()))
            .unwrap_or_default();
        out.push(vec![
            season.to_string(),
            team.id.to_string(),
            player_id.to_string(),
            player_name,
            position_code,
            position.and_then(|p| p.name.clone()).unwrap_or_default(),
            position.and_then(|p| p.kind.clone()).unwrap_or_default(),
            team.name.clone(),
            team.abbrev.clone(),
        ]);
    }
    Ok(out)
}

/// A player listed by two teams in one season keeps the lowest team id, the
/// same tie-break the files were originally built with.
fn dedup_roster_rows(table: &mut RowTable) {
    let (Some(player_idx), Some(team_idx)) = (
        table.column_index("player_id"),
        table.column_index("team_id"),
    ) else {
        return;
    };
    let key_num = |row: &Vec<String>, idx: usize| -> u64 {
        row.get(idx)
            .and_then(|c| c.trim().parse::<u64>().ok())
            .unwrap_or(u64::MAX)
    };
    table
        .rows
        .sort_by_key(|row| (key_num(row, player_idx), key_num(row, team_idx)));
    let mut seen = BTreeSet::new();
    table
        .rows
        .retain(|row| seen.insert(row.get(player_idx).cloned().unwrap_or_default()));
}

/// The tracking leaderboard answers in CSV directly.
pub fn parse_tracking_csv(raw: &str) -> Result<RowTable> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(RowTable::default());
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(trimmed.as_bytes());
    let columns = reader
        .headers()
        .context("read tracking csv header")?
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>();
    let mut table = RowTable::new(columns);
    for record in reader.records() {
        let record = record.context("read tracking csv row")?;
        table.push_row(record.iter().map(|s| s.to_string()).collect());
    }
    Ok(table)
}

fn value_to_cell(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
