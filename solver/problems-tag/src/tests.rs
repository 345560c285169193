//! Tests for the Tag model.

use std::io::Write;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use solver_core::{ChangeFlags, Model, PomdpState, SolverParameters, StatePool};

use super::*;

const OPEN_3X3: &str = "3 3\n...\n...\n...\n";
const WALLED_3X3: &str = "3 3\n...\n.X.\n...\n";

fn model(map: &str) -> TagModel {
    TagModel::from_map_str(map, TagOptions::default(), SolverParameters::for_testing()).unwrap()
}

fn rng() -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(42)
}

fn state(robot: (i64, i64), opponent: (i64, i64)) -> TagState {
    TagState {
        robot: GridPosition::new(robot.0, robot.1),
        opponent: GridPosition::new(opponent.0, opponent.1),
        tagged: false,
    }
}

#[test]
fn test_map_parsing() {
    let m = model(WALLED_3X3);
    assert!(m.is_valid(GridPosition::new(0, 0)));
    assert!(!m.is_valid(GridPosition::new(1, 1)));
    assert!(!m.is_valid(GridPosition::new(-1, 0)));
    assert!(!m.is_valid(GridPosition::new(0, 3)));
    assert_eq!(m.empty_cells.len(), 8);
}

#[test]
fn test_map_parse_errors() {
    let bad_header = TagModel::from_map_str(
        "nope\n...\n",
        TagOptions::default(),
        SolverParameters::for_testing(),
    );
    assert!(matches!(bad_header, Err(TagError::MalformedMap(_))));

    let missing_row = TagModel::from_map_str(
        "3 3\n...\n...\n",
        TagOptions::default(),
        SolverParameters::for_testing(),
    );
    assert!(matches!(missing_row, Err(TagError::MalformedMap(_))));

    let all_walls = TagModel::from_map_str(
        "1 2\nXX\n",
        TagOptions::default(),
        SolverParameters::for_testing(),
    );
    assert!(matches!(all_walls, Err(TagError::MalformedMap(_))));
}

#[test]
fn test_value_bounds_follow_rewards() {
    let m = model(OPEN_3X3);
    let params = m.parameters();
    assert!((params.max_value - 10.0).abs() < 1e-9);
    assert!((params.min_value - (-10.0 / (1.0 - params.discount))).abs() < 1e-9);
}

#[test]
fn test_movement_respects_walls() {
    let m = model(WALLED_3X3);
    // Moving into the central wall keeps the robot in place.
    assert_eq!(
        m.moved_position(GridPosition::new(0, 1), TagAction::South),
        GridPosition::new(0, 1)
    );
    // Moving off the map keeps the robot in place.
    assert_eq!(
        m.moved_position(GridPosition::new(0, 1), TagAction::North),
        GridPosition::new(0, 1)
    );
    // Ordinary moves go through.
    assert_eq!(
        m.moved_position(GridPosition::new(0, 1), TagAction::East),
        GridPosition::new(0, 2)
    );
    // Tag is not a move.
    assert_eq!(
        m.moved_position(GridPosition::new(0, 1), TagAction::Tag),
        GridPosition::new(0, 1)
    );
}

#[test]
fn test_rewards() {
    let m = model(OPEN_3X3);
    let co_located = state((1, 1), (1, 1));
    let apart = state((0, 0), (2, 2));

    assert!((m.reward_for(&co_located, &TagAction::Tag) - 10.0).abs() < 1e-12);
    assert!((m.reward_for(&apart, &TagAction::Tag) - (-10.0)).abs() < 1e-12);
    assert!((m.reward_for(&apart, &TagAction::North) - (-1.0)).abs() < 1e-12);
}

#[test]
fn test_successful_tag_terminates() {
    let mut m = model(OPEN_3X3);
    let mut rng = rng();
    let result = m.generate_step(&state((1, 1), (1, 1)), &TagAction::Tag, &mut rng);

    assert!(result.is_terminal);
    assert!(result.next_state.tagged);
    assert!((result.reward - 10.0).abs() < 1e-12);
    assert!(result.observation.seen);
    // A successful tag freezes both parties.
    assert_eq!(result.next_state.robot, result.next_state.opponent);
}

#[test]
fn test_failed_tag_lets_opponent_flee() {
    let mut m = model(OPEN_3X3);
    let mut rng = rng();
    let result = m.generate_step(&state((0, 0), (2, 2)), &TagAction::Tag, &mut rng);

    assert!(!result.is_terminal);
    assert!((result.reward - (-10.0)).abs() < 1e-12);
    // The robot does not move on a tag attempt.
    assert_eq!(result.next_state.robot, GridPosition::new(0, 0));
}

#[test]
fn test_opponent_flees_away_on_average() {
    // With stay probability 0 the cornered opponent must move away from
    // an adjacent robot on an open map.
    let options = TagOptions {
        opponent_stay_probability: 0.0,
        ..TagOptions::default()
    };
    let mut m =
        TagModel::from_map_str("3 3\n...\n...\n...\n", options, SolverParameters::for_testing())
            .unwrap();
    let mut rng = rng();

    for _ in 0..50 {
        let result = m.generate_step(&state((0, 0), (1, 1)), &TagAction::North, &mut rng);
        let opponent = result.next_state.opponent;
        // Fleeing from (1,1) away from (0,0) lands on row 2 or column 2.
        assert!(opponent.row == 2 || opponent.col == 2, "fled to {opponent}");
    }
}

#[test]
fn test_observation_reports_co_location() {
    let seen = TagModel::make_observation(&state((1, 1), (1, 1)));
    assert!(seen.seen);
    let unseen = TagModel::make_observation(&state((1, 1), (0, 0)));
    assert!(!unseen.seen);
    assert_eq!(unseen.position, GridPosition::new(1, 1));
}

#[test]
fn test_heuristic_value() {
    let m = model(OPEN_3X3);
    // Co-located: an immediate tag is worth the full reward.
    assert!((m.heuristic_value(&state((1, 1), (1, 1))) - 10.0).abs() < 1e-9);
    // Tagged states are worth nothing more.
    let tagged = TagState {
        tagged: true,
        ..state((1, 1), (1, 1))
    };
    assert!(m.heuristic_value(&tagged).abs() < 1e-12);
    // Distant opponents are worth less than adjacent ones.
    assert!(
        m.heuristic_value(&state((0, 0), (0, 1))) > m.heuristic_value(&state((0, 0), (2, 2)))
    );
}

#[test]
fn test_state_distance_and_coordinates() {
    let a = state((0, 0), (2, 2));
    let b = state((1, 0), (2, 1));
    assert!((a.distance_to(&b) - 2.0).abs() < 1e-12);
    assert_eq!(a.coordinates(), vec![0.0, 0.0, 2.0, 2.0, 0.0]);
}

#[test]
fn test_seen_observation_collapses_particles() {
    let mut m = model(OPEN_3X3);
    let mut rng = rng();
    let obs = TagObservation {
        position: GridPosition::new(1, 1),
        seen: true,
    };

    let particles = m.generate_particles(&TagAction::East, &obs, &[state((1, 0), (2, 2))], &mut rng);
    assert_eq!(particles.len(), 1);
    assert_eq!(particles[0].robot, particles[0].opponent);
    assert!(!particles[0].tagged);

    let tag_particles = m.generate_particles_uninformed(&TagAction::Tag, &obs, &mut rng);
    assert_eq!(tag_particles.len(), 1);
    assert!(tag_particles[0].tagged);
}

#[test]
fn test_prior_aware_particles_match_observation() {
    let mut m = model(OPEN_3X3);
    let mut rng = rng();
    let obs = TagObservation {
        position: GridPosition::new(0, 1),
        seen: false,
    };
    let prior = vec![state((0, 0), (2, 2)), state((0, 0), (1, 1))];

    let particles = m.generate_particles(&TagAction::East, &obs, &prior, &mut rng);
    assert!(!particles.is_empty());
    for p in &particles {
        assert_eq!(p.robot, obs.position);
        assert_ne!(p.opponent, obs.position);
        assert!(!p.tagged);
    }
}

#[test]
fn test_prior_aware_particles_empty_on_inconsistent_prior() {
    let mut m = model(OPEN_3X3);
    let mut rng = rng();
    // The prior robot cannot reach (2,2) in one eastward step.
    let obs = TagObservation {
        position: GridPosition::new(2, 2),
        seen: false,
    };
    let prior = vec![state((0, 0), (1, 1))];

    let particles = m.generate_particles(&TagAction::East, &obs, &prior, &mut rng);
    assert!(particles.is_empty());
}

#[test]
fn test_uninformed_particles_match_observation() {
    let mut m = model(OPEN_3X3);
    let mut rng = rng();
    let obs = TagObservation {
        position: GridPosition::new(0, 1),
        seen: false,
    };

    let particles = m.generate_particles_uninformed(&TagAction::East, &obs, &mut rng);
    assert!(!particles.is_empty());
    for p in &particles {
        assert_eq!(p.robot, obs.position);
        assert_ne!(p.opponent, obs.position);
    }
}

#[test]
fn test_render_state() {
    let m = model(WALLED_3X3);
    let rendered = m.render_state(&state((0, 0), (2, 2)));
    assert_eq!(rendered, "r..\n.X.\n..o\n");
    let rendered = m.render_state(&state((0, 0), (0, 0)));
    assert!(rendered.starts_with('#'));
}

#[test]
fn test_load_changes() {
    let mut m = model(OPEN_3X3);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "t 3 numChanges 2\n\
         ADD Obstacle o1 1 1 1 1\n\
         REMOVE Obstacle o1 0 0 0 0\n\
         t 7 numChanges 1\n\
         ADD Obstacle o2 0 0 0 2\n"
    )
    .unwrap();

    let times = m.load_changes(file.path()).unwrap();
    assert_eq!(times, vec![3, 7]);
    // The unknown REMOVE operation is skipped with a warning.
    assert_eq!(m.changes[&3].len(), 1);
    assert_eq!(m.changes[&7].len(), 1);
}

#[test]
fn test_load_changes_rejects_garbage() {
    let mut m = model(OPEN_3X3);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "t nope numChanges 1\n").unwrap();
    assert!(matches!(
        m.load_changes(file.path()),
        Err(TagError::MalformedChanges { line: 1, .. })
    ));
}

#[test]
fn test_update_flags_states_in_rectangle() {
    let mut m = model(OPEN_3X3);
    let mut pool: StatePool<TagModel> = StatePool::new(m.create_state_index());

    let inside_robot = pool.create_or_get(state((1, 1), (0, 0)));
    let inside_opponent = pool.create_or_get(state((0, 0), (1, 1)));
    let outside = pool.create_or_get(state((0, 0), (2, 2)));

    m.changes.insert(
        5,
        vec![TagChange {
            min: GridPosition::new(1, 1),
            max: GridPosition::new(1, 1),
        }],
    );
    m.update(5, &mut pool);

    assert!(pool.get(inside_robot).change_flags().contains(ChangeFlags::DELETED));
    assert!(pool
        .get(inside_opponent)
        .change_flags()
        .contains(ChangeFlags::DELETED));
    assert!(pool.get(outside).change_flags().is_empty());
    // The cell itself became a wall.
    assert!(!m.is_valid(GridPosition::new(1, 1)));
    assert_eq!(m.empty_cells.len(), 8);
}

#[test]
fn test_update_without_schedule_is_noop() {
    let mut m = model(OPEN_3X3);
    let mut pool: StatePool<TagModel> = StatePool::new(m.create_state_index());
    pool.create_or_get(state((0, 0), (1, 1)));

    m.update(99, &mut pool);
    assert_eq!(pool.affected_states().count(), 0);
}

#[test]
fn test_from_config_reads_map_file() {
    let dir = tempfile::tempdir().unwrap();
    let map_path = dir.path().join("map.txt");
    std::fs::write(&map_path, OPEN_3X3).unwrap();

    let mut config = SolverConfig::default();
    config.problem.map_path = map_path.display().to_string();
    config.tag.tag_reward = 20.0;

    let m = TagModel::from_config(&config).unwrap();
    assert!((m.options().tag_reward - 20.0).abs() < 1e-12);
    assert!((m.parameters().max_value - 20.0).abs() < 1e-12);
}

#[test]
fn test_from_config_missing_map_fails() {
    let mut config = SolverConfig::default();
    config.problem.map_path = "/nonexistent/map.txt".into();
    assert!(matches!(TagModel::from_config(&config), Err(TagError::Io { .. })));
}
