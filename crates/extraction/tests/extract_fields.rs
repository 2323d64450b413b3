//! End-to-end extraction against the counting fixture collaborators.

mod common;

use common::*;
use extraction::{
    ExtractError, InterpolationConfig, InterpolationMethod, PointStatus,
};
use icon_common::{FieldQuery, GeoPoint, Level};
use tokio_test::{assert_err, assert_ok};

fn at_run0(parameter: &str) -> FieldQuery {
    FieldQuery::new(parameter).at_run(reference(0))
}

#[tokio::test]
async fn test_exact_grid_point_returns_stored_value() {
    let (service, _) = default_service();
    let queries = [
        (at_run0("t_2m"), T_2M.to_vec()),
        (at_run0("pmsl"), PMSL.to_vec()),
        (
            at_run0("t").at_level(Level::ModelLevel(65)),
            T_2M.iter().map(|v| v + 10.0).collect(),
        ),
        (at_run0("t").at_level(Level::ModelLevel(64)), vec![1.0, 2.0, 3.0]),
    ];

    for interpolation in [InterpolationConfig::nearest(), InterpolationConfig::inverse_distance(4)] {
        for (query, expected) in &queries {
            for ((lat, lon), value) in GRID.iter().zip(expected) {
                let result = assert_ok!(
                    service
                        .extract_with(MODEL, query, &[GeoPoint::new(*lat, *lon)], Some(interpolation))
                        .await
                );
                assert_eq!(result.points[0].status, PointStatus::Ok);
                assert_eq!(result.points[0].value, Some(*value), "{} at ({}, {})", query.parameter, lat, lon);
            }
        }
    }
}

#[tokio::test]
async fn test_weighted_interpolation_leans_to_nearer_point() {
    let (service, _) = default_service();

    let result = assert_ok!(
        service
            .extract_with(
                MODEL,
                &at_run0("t_2m"),
                &[GeoPoint::new(50.05, 10.0)],
                Some(InterpolationConfig::inverse_distance(2)),
            )
            .await
    );

    let value = result.points[0].value.unwrap();
    assert_eq!(result.interpolation, InterpolationMethod::InverseDistance);
    assert!(value > 5.0 && value < 5.4, "got {}", value);
    assert!(value < 5.2, "expected closer to 5.0 than the midpoint, got {}", value);
}

#[tokio::test]
async fn test_far_points_are_outside_grid() {
    let (service, _) = default_service();
    let points = [
        GeoPoint::new(50.0, 10.0),
        GeoPoint::new(-33.9, 151.2),
        GeoPoint::new(52.5, 13.4),
        GeoPoint::new(50.1, 10.0),
    ];

    let result = assert_ok!(service.extract(MODEL, &at_run0("t_2m"), &points).await);

    let statuses: Vec<PointStatus> = result.points.iter().map(|p| p.status).collect();
    assert_eq!(
        statuses,
        vec![
            PointStatus::Ok,
            PointStatus::PointOutsideGrid,
            PointStatus::PointOutsideGrid,
            PointStatus::Ok
        ]
    );
    assert_eq!(result.values(), vec![Some(5.0), None, None, Some(5.4)]);
    assert_eq!(result.points[1].point, points[1]);
}

#[tokio::test]
async fn test_undefined_values_are_not_blended() {
    let (service, _) = default_service();
    let query = at_run0("tot_prec");

    let result = assert_ok!(
        service
            .extract(
                MODEL,
                &query,
                &[
                    GeoPoint::new(50.0, 10.0),
                    GeoPoint::new(50.1, 10.0),
                    GeoPoint::new(50.05, 10.03),
                ],
            )
            .await
    );

    assert_eq!(result.points[0].value, Some(0.5));
    assert_eq!(result.points[1].status, PointStatus::PointOutsideGrid);
    assert_eq!(result.points[2].status, PointStatus::PointOutsideGrid);
}

#[tokio::test]
async fn test_repeated_queries_are_idempotent_and_cached() {
    let (service, calls) = default_service();
    let points = [GeoPoint::new(50.03, 10.02), GeoPoint::new(50.0, 10.1)];

    let first = assert_ok!(service.extract(MODEL, &at_run0("t_2m"), &points).await);
    for _ in 0..5 {
        let again = assert_ok!(service.extract(MODEL, &at_run0("t_2m"), &points).await);
        assert_eq!(again, first);
    }

    assert_eq!(calls.fetches(), 1);
    assert_eq!(calls.opens(), 1);
    assert_eq!(calls.value_reads(), 1);
}

#[tokio::test]
async fn test_new_parameter_decodes_only_that_message() {
    let (service, calls) = default_service();
    let point = [GeoPoint::new(50.0, 10.0)];

    assert_ok!(service.extract(MODEL, &at_run0("t_2m"), &point).await);
    assert_ok!(service.extract(MODEL, &at_run0("pmsl"), &point).await);
    assert_ok!(service.extract(MODEL, &at_run0("t_2m"), &point).await);

    assert_eq!(calls.fetches(), 1);
    assert_eq!(calls.opens(), 1);
    assert_eq!(calls.value_reads(), 2);

    let lease = service.cache().get(&run(0, 0)).await.unwrap();
    assert_eq!(lease.decoded_fields().await, 2);
    // Both messages share the fixture grid, so one index serves them.
    assert_eq!(lease.grid_layouts().await, 1);
}

#[tokio::test]
async fn test_parameter_missing_from_run() {
    let (service, calls) = default_service();

    let err = assert_err!(
        service
            .extract(MODEL, &at_run0("clct"), &[GeoPoint::new(50.0, 10.0)])
            .await
    );
    assert!(matches!(err, ExtractError::ParameterUnavailable { .. }), "{:?}", err);
    assert_eq!(err.status_code(), 404);
    assert_eq!(calls.fetches(), 1);
}

#[tokio::test]
async fn test_level_missing_from_run() {
    let (service, _) = default_service();
    let query = at_run0("t").at_level(Level::ModelLevel(30));

    let err = assert_err!(service.extract(MODEL, &query, &[GeoPoint::new(50.0, 10.0)]).await);
    match err {
        ExtractError::LevelUnavailable { level, available, .. } => {
            assert_eq!(level, "model-level-30");
            assert_eq!(available, "model-level-64, model-level-65");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_parameter_fails_before_io() {
    let (service, calls) = default_service();

    let err = assert_err!(
        service
            .extract(MODEL, &at_run0("no_such_field"), &[GeoPoint::new(50.0, 10.0)])
            .await
    );
    assert_eq!(err.status_code(), 400);
    assert_eq!(err.kind(), "unknown-parameter");

    let err = assert_err!(
        service
            .extract("icon-xyz", &at_run0("t_2m"), &[GeoPoint::new(50.0, 10.0)])
            .await
    );
    assert_eq!(err.kind(), "unknown-model");

    assert_eq!(calls.fetches(), 0);
    assert_eq!(calls.published.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_points_fail_before_io() {
    let (service, calls) = default_service();

    for bad in [GeoPoint::new(91.0, 10.0), GeoPoint::new(f64::NAN, 10.0), GeoPoint::new(50.0, 400.0)] {
        let err = assert_err!(
            service
                .extract(MODEL, &at_run0("t_2m"), &[GeoPoint::new(50.0, 10.0), bad])
                .await
        );
        assert!(matches!(err, ExtractError::InvalidQuery(_)), "{:?}", err);
    }
    assert_eq!(calls.fetches(), 0);
}

#[tokio::test]
async fn test_oversized_neighbour_count_is_rejected() {
    let (service, calls) = default_service();

    for k in [usize::MAX, 1 << 40, extraction::MAX_NEIGHBOURS + 1] {
        let err = assert_err!(
            service
                .extract_with(
                    MODEL,
                    &at_run0("t_2m"),
                    &[GeoPoint::new(50.05, 10.0)],
                    Some(InterpolationConfig::inverse_distance(k)),
                )
                .await
        );
        assert!(matches!(err, ExtractError::InvalidQuery(_)), "{:?}", err);
        assert_eq!(err.status_code(), 400);
    }
    assert_eq!(calls.fetches(), 0);

    let result = assert_ok!(
        service
            .extract_with(
                MODEL,
                &at_run0("t_2m"),
                &[GeoPoint::new(50.05, 10.0)],
                Some(InterpolationConfig::inverse_distance(extraction::MAX_NEIGHBOURS)),
            )
            .await
    );
    assert_eq!(result.points[0].status, PointStatus::Ok);
}

#[tokio::test]
async fn test_empty_point_list_needs_no_fetch() {
    let (service, calls) = default_service();

    let result = assert_ok!(service.extract(MODEL, &at_run0("t_2m"), &[]).await);
    assert!(result.points.is_empty());
    assert_eq!(result.run, run(0, 0));
    assert_eq!(result.level, Level::HeightAboveGround(2));
    assert_eq!(calls.fetches(), 0);
}

#[tokio::test]
async fn test_latest_run_is_newest_published() {
    let (service, calls) = default_service();
    let query = FieldQuery::new("t_2m").at_step(6);

    let result = assert_ok!(service.extract(MODEL, &query, &[GeoPoint::new(50.0, 10.0)]).await);
    assert_eq!(result.run, run(6, 6));
    assert_eq!(result.units, "K");
    assert_eq!(calls.published.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unpublished_run_and_bad_step() {
    let (service, _) = default_service();

    let err = assert_err!(
        service
            .extract(
                MODEL,
                &FieldQuery::new("t_2m").at_run(reference(12)),
                &[GeoPoint::new(50.0, 10.0)],
            )
            .await
    );
    assert!(matches!(err, ExtractError::RunNotAvailable(_)), "{:?}", err);
    assert_eq!(err.status_code(), 404);

    let err = assert_err!(
        service
            .extract(MODEL, &at_run0("t_2m").at_step(400), &[GeoPoint::new(50.0, 10.0)])
            .await
    );
    assert!(matches!(err, ExtractError::InvalidQuery(_)), "{:?}", err);
}

#[tokio::test]
async fn test_batch_marks_unavailable_fields_per_point() {
    let (service, calls) = default_service();
    let queries = [at_run0("t_2m"), at_run0("clct"), at_run0("pmsl")];
    let points = [GeoPoint::new(50.0, 10.0), GeoPoint::new(50.1, 10.0)];

    let results = assert_ok!(service.extract_batch(MODEL, &queries, &points).await);

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].values(), vec![Some(5.0), Some(5.4)]);
    assert!(results[1]
        .points
        .iter()
        .all(|p| p.status == PointStatus::ParameterUnavailableForRun && p.value.is_none()));
    assert_eq!(results[2].values(), vec![Some(101_325.0), Some(101_300.0)]);
    assert_eq!(calls.fetches(), 1);
}

#[tokio::test]
async fn test_result_serializes_status_strings() {
    let (service, _) = default_service();
    let result = assert_ok!(
        service
            .extract(MODEL, &at_run0("t_2m"), &[GeoPoint::new(50.0, 10.0), GeoPoint::new(0.0, 0.0)])
            .await
    );

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["points"][0]["status"], "ok");
    assert_eq!(json["points"][1]["status"], "point-outside-grid");
    assert_eq!(json["level"], "2m");
    assert_eq!(json["interpolation"], "idw");
}
