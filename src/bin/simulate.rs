use chain_reaction_server::engine::{self, ResolveOptions, WinGate};
use chain_reaction_server::game::Game;
use chain_reaction_server::grid::Grid;
use chain_reaction_server::server_utils::{
    grid_size_or_default, normalize_player_count, parse_grid_size_name,
};
use chain_reaction_server::types::{GridSize, PlayerId, Position, ReactionEvent};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

const DEFAULT_MAX_MOVES: usize = 5_000;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long)]
    games: Option<usize>,
    #[arg(long)]
    players: Option<i64>,
    #[arg(long)]
    grid_size: Option<String>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = DEFAULT_MAX_MOVES)]
    max_moves: usize,
    #[arg(long)]
    match_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct Scenario {
    name: String,
    players: usize,
    #[serde(rename = "gridSize")]
    grid_size: GridSize,
    seed: u64,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioResultLine {
    scenario: String,
    seed: u64,
    players: usize,
    #[serde(rename = "gridSize")]
    grid_size: GridSize,
    winner: Option<PlayerId>,
    moves: usize,
    explosions: usize,
    #[serde(rename = "maxRounds")]
    max_rounds: usize,
    #[serde(rename = "exhaustedMoves")]
    exhausted_moves: usize,
    #[serde(rename = "eliminationOrder")]
    elimination_order: Vec<PlayerId>,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    #[serde(rename = "move")]
    move_index: usize,
    message: String,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioRunResult {
    #[serde(flatten)]
    result: ScenarioResultLine,
    #[serde(rename = "anomalyRecords")]
    anomaly_records: Vec<AnomalyRecord>,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "scenarioCount")]
    scenario_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "averageMoves")]
    average_moves: usize,
    #[serde(rename = "winnerCounts")]
    winner_counts: BTreeMap<String, usize>,
    scenarios: Vec<ScenarioResultLine>,
}

#[derive(Clone, Debug, Serialize)]
struct StructuredLogLine {
    #[serde(rename = "timestampMs")]
    timestamp_ms: u64,
    level: String,
    event: String,
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(rename = "move", skip_serializing_if = "Option::is_none")]
    move_index: Option<usize>,
    details: Value,
}

fn main() {
    let cli = Cli::parse();
    let scenarios = resolve_scenarios(&cli);
    let run_started_at_ms = now_ms();
    let seed_hint = scenarios.first().map(|scenario| scenario.seed).unwrap_or(0);
    let match_id = cli
        .match_id
        .clone()
        .unwrap_or_else(|| default_match_id(seed_hint, run_started_at_ms));
    let mut has_anomaly = false;
    let mut scenario_results = Vec::new();
    let mut winner_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_moves = 0usize;
    let mut total_anomalies = 0usize;

    for scenario in scenarios {
        emit_log(
            "info",
            "scenario_started",
            &match_id,
            Some(&scenario.name),
            Some(scenario.seed),
            None,
            json!({
                "players": scenario.players,
                "gridSize": scenario.grid_size,
            }),
        );
        let scenario_run = run_scenario(&scenario, cli.max_moves);

        for anomaly in &scenario_run.anomaly_records {
            emit_log(
                "warn",
                "anomaly_detected",
                &match_id,
                Some(&scenario.name),
                Some(scenario.seed),
                Some(anomaly.move_index),
                json!({
                    "message": anomaly.message,
                }),
            );
        }

        if !scenario_run.result.anomalies.is_empty() {
            has_anomaly = true;
        }
        total_anomalies += scenario_run.anomaly_records.len();
        total_moves += scenario_run.result.moves;
        *winner_counts
            .entry(winner_key(scenario_run.result.winner))
            .or_insert(0) += 1;

        emit_log(
            "info",
            "scenario_finished",
            &match_id,
            Some(&scenario.name),
            Some(scenario.seed),
            Some(scenario_run.result.moves),
            json!({
                "winner": scenario_run.result.winner,
                "explosions": scenario_run.result.explosions,
                "maxRounds": scenario_run.result.max_rounds,
                "anomalyCount": scenario_run.anomaly_records.len(),
            }),
        );

        if let Ok(line) = serde_json::to_string(&scenario_run.result) {
            println!("{line}");
        }
        scenario_results.push(scenario_run.result);
    }

    let run_finished_at_ms = now_ms();
    let summary = build_run_summary(
        match_id.clone(),
        run_started_at_ms,
        run_finished_at_ms,
        scenario_results,
        winner_counts,
        total_anomalies,
        total_moves,
    );

    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &match_id,
                None,
                None,
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
        summary_out_written = Some(path.to_string_lossy().to_string());
    }

    emit_log(
        "info",
        "run_finished",
        &match_id,
        None,
        None,
        None,
        json!({
            "scenarioCount": summary.scenario_count,
            "anomalyCount": summary.anomaly_count,
            "averageMoves": summary.average_moves,
            "winnerCounts": summary.winner_counts,
            "summaryOut": summary_out_written,
        }),
    );

    if has_anomaly {
        std::process::exit(1);
    }
}

fn run_scenario(scenario: &Scenario, max_moves: usize) -> ScenarioRunResult {
    let mut rng = StdRng::seed_from_u64(scenario.seed);
    let mut game = Game::with_grid(
        Grid::with_size(scenario.grid_size),
        scenario.players,
        ResolveOptions::authoritative(),
    );

    let mut anomalies = Vec::new();
    let mut anomaly_records = Vec::new();
    let mut anomaly_seen = HashSet::new();
    let mut explosions = 0usize;
    let mut max_rounds = 0usize;
    let mut exhausted_moves = 0usize;
    let mut elimination_order = Vec::new();
    let mut moves = 0usize;

    while let Some(player) = game.current_turn() {
        if moves >= max_moves {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                moves,
                "move limit reached without a winner".to_string(),
            );
            break;
        }

        let legal = game.grid().legal_moves(player);
        if legal.is_empty() {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                moves,
                format!("player {player} has no legal move"),
            );
            break;
        }
        let pos = legal[rng.random_range(0..legal.len())];

        let before = game.clone();
        let outcome = match game.apply_move(player, pos) {
            Ok(outcome) => outcome,
            Err(reason) => {
                push_anomaly(
                    &mut anomalies,
                    &mut anomaly_records,
                    &mut anomaly_seen,
                    moves,
                    format!("legal move rejected: {reason}"),
                );
                break;
            }
        };
        moves += 1;
        explosions += outcome
            .events
            .iter()
            .filter(|event| matches!(event, ReactionEvent::Explosion { .. }))
            .count();
        max_rounds = max_rounds.max(outcome.rounds);
        if outcome.exhausted {
            exhausted_moves += 1;
        }
        elimination_order.extend(outcome.newly_eliminated.iter().copied());

        for message in collect_move_anomalies(
            &before,
            &game,
            player,
            pos,
            outcome.winner,
            outcome.exhausted,
        ) {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                moves,
                message,
            );
        }
    }

    ScenarioRunResult {
        result: ScenarioResultLine {
            scenario: scenario.name.clone(),
            seed: scenario.seed,
            players: scenario.players,
            grid_size: scenario.grid_size,
            winner: game.winner(),
            moves,
            explosions,
            max_rounds,
            exhausted_moves,
            elimination_order,
            anomalies,
        },
        anomaly_records,
    }
}

fn collect_move_anomalies(
    before: &Game,
    after: &Game,
    player: PlayerId,
    pos: Position,
    winner: Option<PlayerId>,
    exhausted: bool,
) -> Vec<String> {
    let mut anomalies = Vec::new();

    if !after.grid().is_well_formed() {
        anomalies.push("grid is not well formed".to_string());
    }

    let expected_orbs = before.grid().total_orbs() + 1;
    if after.grid().total_orbs() != expected_orbs {
        anomalies.push(format!(
            "orb total changed: expected {expected_orbs}, found {}",
            after.grid().total_orbs()
        ));
    }

    if winner.is_none() && !exhausted && !after.grid().is_stable() {
        anomalies.push("unstable board handed to next player".to_string());
    }

    let mut recheck = after.clone();
    if !recheck.check_eliminations().is_empty() {
        anomalies.push("elimination check is not idempotent".to_string());
    }

    if let Some(winner) = winner {
        let holders = after.grid().owners_with_orbs();
        if holders.len() != 1 || !holders.contains(&winner) {
            anomalies.push(format!(
                "winner {winner} disagrees with orb holders {holders:?}"
            ));
        }
    }

    if !replays_identically(before, after, player, pos) {
        anomalies.push("re-resolving the move did not reproduce the board".to_string());
    }
    anomalies
}

fn replays_identically(before: &Game, after: &Game, player: PlayerId, pos: Position) -> bool {
    let movers = before.mover_count() + usize::from(!before.has_moved(player));
    let gate = WinGate { movers };
    let first = engine::resolve(before.grid(), pos, player, gate, before.options());
    let second = engine::resolve(before.grid(), pos, player, gate, before.options());
    first == second && first.grid == *after.grid()
}

fn resolve_scenarios(cli: &Cli) -> Vec<Scenario> {
    let seed = cli.seed.unwrap_or_else(now_ms);
    let custom = cli.games.is_some() || cli.players.is_some() || cli.grid_size.is_some();

    if custom {
        let players = normalize_player_count(cli.players);
        let grid_size =
            grid_size_or_default(cli.grid_size.as_deref().and_then(parse_grid_size_name));
        let games = cli.games.unwrap_or(1).clamp(1, 1_000);
        return (0..games)
            .map(|index| Scenario {
                name: format!("custom-{players}p-{index}"),
                players,
                grid_size,
                seed: seed.wrapping_add(index as u64),
            })
            .collect();
    }

    vec![
        Scenario {
            name: "quick-check-2p-small".to_string(),
            players: 2,
            grid_size: GridSize::Small,
            seed,
        },
        Scenario {
            name: "crowded-4p-medium".to_string(),
            players: 4,
            grid_size: GridSize::Medium,
            seed: seed.wrapping_add(1),
        },
        Scenario {
            name: "full-table-8p-xlarge".to_string(),
            players: 8,
            grid_size: GridSize::XLarge,
            seed: seed.wrapping_add(2),
        },
    ]
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    anomaly_records: &mut Vec<AnomalyRecord>,
    anomaly_seen: &mut HashSet<String>,
    move_index: usize,
    message: String,
) {
    anomaly_records.push(AnomalyRecord {
        move_index,
        message: message.clone(),
    });
    if anomaly_seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn default_match_id(seed: u64, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn build_run_summary(
    match_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    scenarios: Vec<ScenarioResultLine>,
    winner_counts: BTreeMap<String, usize>,
    anomaly_count: usize,
    total_moves: usize,
) -> RunSummary {
    let scenario_count = scenarios.len();
    let average_moves = if scenario_count == 0 {
        0
    } else {
        total_moves / scenario_count
    };
    RunSummary {
        match_id,
        started_at_ms,
        finished_at_ms,
        scenario_count,
        anomaly_count,
        average_moves,
        winner_counts,
        scenarios,
    }
}

fn emit_log(
    level: &str,
    event: &str,
    match_id: &str,
    scenario: Option<&str>,
    seed: Option<u64>,
    move_index: Option<usize>,
    details: Value,
) {
    let log_line = StructuredLogLine {
        timestamp_ms: now_ms(),
        level: level.to_string(),
        event: event.to_string(),
        match_id: match_id.to_string(),
        scenario: scenario.map(|value| value.to_string()),
        seed,
        move_index,
        details,
    };
    if let Ok(line) = serde_json::to_string(&log_line) {
        eprintln!("{line}");
    }
}

fn winner_key(winner: Option<PlayerId>) -> String {
    match winner {
        Some(player) => format!("player_{player}"),
        None => "none".to_string(),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_scenario_result(winner: Option<PlayerId>, moves: usize) -> ScenarioResultLine {
        ScenarioResultLine {
            scenario: "test".to_string(),
            seed: 42,
            players: 2,
            grid_size: GridSize::Small,
            winner,
            moves,
            explosions: 0,
            max_rounds: 0,
            exhausted_moves: 0,
            elimination_order: Vec::new(),
            anomalies: Vec::new(),
        }
    }

    fn scenario(players: usize, grid_size: GridSize, seed: u64) -> Scenario {
        Scenario {
            name: "test".to_string(),
            players,
            grid_size,
            seed,
        }
    }

    #[test]
    fn default_match_id_contains_seed_and_timestamp() {
        assert_eq!(default_match_id(42, 123456789), "sim-42-123456789");
    }

    #[test]
    fn build_run_summary_calculates_average_moves() {
        let summary = build_run_summary(
            "sim-42-1".to_string(),
            1,
            2,
            vec![
                make_scenario_result(Some(0), 30),
                make_scenario_result(Some(1), 50),
            ],
            BTreeMap::from([
                ("player_0".to_string(), 1usize),
                ("player_1".to_string(), 1usize),
            ]),
            0,
            80,
        );
        assert_eq!(summary.average_moves, 40);
        assert_eq!(summary.scenario_count, 2);
    }

    #[test]
    fn random_two_player_game_finishes_cleanly() {
        let run = run_scenario(&scenario(2, GridSize::Small, 7), DEFAULT_MAX_MOVES);
        assert!(run.result.anomalies.is_empty(), "{:?}", run.result.anomalies);
        let winner = run.result.winner.expect("game should produce a winner");
        assert!(winner < 2);
        assert_eq!(run.result.elimination_order, vec![1 - winner]);
    }

    #[test]
    fn random_four_player_game_finishes_cleanly() {
        let run = run_scenario(&scenario(4, GridSize::Small, 11), DEFAULT_MAX_MOVES);
        assert!(run.result.anomalies.is_empty(), "{:?}", run.result.anomalies);
        assert!(run.result.winner.is_some());
        assert_eq!(run.result.elimination_order.len(), 3);
    }

    #[test]
    fn same_seed_replays_identically() {
        let first = run_scenario(&scenario(3, GridSize::Small, 99), DEFAULT_MAX_MOVES);
        let second = run_scenario(&scenario(3, GridSize::Small, 99), DEFAULT_MAX_MOVES);
        assert_eq!(first.result.winner, second.result.winner);
        assert_eq!(first.result.moves, second.result.moves);
        assert_eq!(first.result.explosions, second.result.explosions);
    }

    #[test]
    fn move_limit_is_reported_as_anomaly() {
        let run = run_scenario(&scenario(2, GridSize::Medium, 5), 3);
        assert_eq!(run.result.moves, 3);
        assert_eq!(
            run.result.anomalies,
            vec!["move limit reached without a winner".to_string()]
        );
    }

    #[test]
    fn write_summary_returns_error_when_parent_does_not_exist() {
        let target = std::env::temp_dir()
            .join(format!("chain-reaction-missing-{}", now_ms()))
            .join("summary.json");
        let summary = build_run_summary(
            "sim-1-1".to_string(),
            1,
            2,
            vec![make_scenario_result(None, 10)],
            BTreeMap::from([("none".to_string(), 1usize)]),
            0,
            10,
        );
        assert!(write_summary(&target, &summary).is_err());
    }

    #[test]
    fn push_anomaly_keeps_records_and_deduplicates_summary_messages() {
        let mut anomalies = Vec::new();
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        push_anomaly(&mut anomalies, &mut records, &mut seen, 10, "same".to_string());
        push_anomaly(&mut anomalies, &mut records, &mut seen, 11, "same".to_string());

        assert_eq!(anomalies.len(), 1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].move_index, 11);
    }
}
