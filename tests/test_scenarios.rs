mod common;

use common::*;
use vision_harness::fixtures::builtin_catalog;

#[tokio::test]
async fn test_empty_scene_passes_with_no_detections() -> anyhow::Result<()> {
    let catalog = builtin_catalog()?;
    let fixture = catalog.get(&id("BVA-001")).expect("BVA-001 in catalog").clone();
    let (_dir, entries) = create_image_dir(&[fixture]);

    let runner = Runner::new(StubDetector::returning(vec![]));
    let run = runner.run(&runnable(&entries)).await?;

    let result = &run.results[0];
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.verdict, Verdict::Pass);
    assert_eq!(result.discrepancy, Discrepancy::None);
    assert_eq!(result.detected(), Some(0));
    Ok(())
}

#[tokio::test]
async fn test_undercount_is_false_negative() -> anyhow::Result<()> {
    let catalog = builtin_catalog()?;
    let fixture = catalog.get(&id("BVA-005")).expect("BVA-005 in catalog").clone();
    assert_eq!(fixture.expected.count, 5);
    let (_dir, entries) = create_image_dir(&[fixture]);

    let runner = Runner::new(StubDetector::returning(people(3, 0.8)));
    let run = runner.run(&runnable(&entries)).await?;

    let result = &run.results[0];
    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.discrepancy, Discrepancy::FalseNegative);
    assert_eq!(result.detected(), Some(3));
    assert!(!result.failure_reasons.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_person_in_no_people_scene_is_false_positive() -> anyhow::Result<()> {
    let catalog = builtin_catalog()?;
    let fixture = catalog.get(&id("EP-003")).expect("EP-003 in catalog").clone();
    assert!(fixture.expected.expects_absence());
    let (_dir, entries) = create_image_dir(&[fixture]);

    let runner = Runner::new(StubDetector::returning(vec![person(0.6), object("Chair", 0.9)]));
    let run = runner.run(&runnable(&entries)).await?;

    let result = &run.results[0];
    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.discrepancy, Discrepancy::FalsePositive);
    assert_eq!(result.matched_detections.len(), 1);
    assert_eq!(result.detections.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_low_confidence_person_does_not_count() -> anyhow::Result<()> {
    let fixture = people_fixture("EP-003", 0);
    let (_dir, entries) = create_image_dir(&[fixture]);

    let runner = Runner::new(StubDetector::returning(vec![person(0.49)]));
    let run = runner.run(&runnable(&entries)).await?;

    assert_eq!(run.results[0].verdict, Verdict::Pass);
    Ok(())
}

#[tokio::test]
async fn test_threshold_is_inclusive_and_configurable() -> anyhow::Result<()> {
    let fixture = people_fixture("DT-002", 2);
    let (_dir, entries) = create_image_dir(&[fixture]);

    let runner = Runner::new(StubDetector::returning(vec![person(0.7), person(0.5)]));
    let run = runner.run(&runnable(&entries)).await?;
    assert_eq!(run.results[0].verdict, Verdict::Pass);

    let strict = Runner::new(StubDetector::returning(vec![person(0.7), person(0.5)])).with_threshold(0.6);
    let run = strict.run(&runnable(&entries)).await?;
    assert_eq!(run.results[0].verdict, Verdict::Fail);
    assert_eq!(run.results[0].discrepancy, Discrepancy::FalseNegative);
    assert_eq!(run.results[0].confidence_threshold, 0.6);
    Ok(())
}

#[tokio::test]
async fn test_tolerance_accepts_near_counts() -> anyhow::Result<()> {
    let mut fixture = people_fixture("EP-008", 12);
    fixture.expected = fixture.expected.with_tolerance(2);
    let (_dir, entries) = create_image_dir(&[fixture]);

    let runner = Runner::new(StubDetector::returning(people(10, 0.9)));
    let run = runner.run(&runnable(&entries)).await?;
    assert_eq!(run.results[0].verdict, Verdict::Pass);

    let runner = Runner::new(StubDetector::returning(people(15, 0.9)));
    let run = runner.run(&runnable(&entries)).await?;
    assert_eq!(run.results[0].discrepancy, Discrepancy::FalsePositive);
    Ok(())
}

#[tokio::test]
async fn test_exact_count_with_low_mean_confidence_still_passes() -> anyhow::Result<()> {
    let catalog = builtin_catalog()?;
    let fixture = catalog.get(&id("BVA-003")).expect("BVA-003 in catalog").clone();
    assert_eq!(fixture.expected.min_mean_confidence, Some(0.75));
    let (_dir, entries) = create_image_dir(&[fixture]);

    let runner = Runner::new(StubDetector::returning(people(2, 0.6)));
    let run = runner.run(&runnable(&entries)).await?;

    let result = &run.results[0];
    assert_eq!(result.detected(), Some(2));
    assert_eq!(result.verdict, Verdict::Pass);
    assert_eq!(result.discrepancy, Discrepancy::None);
    assert!(result.failure_reasons.iter().all(|r| r.contains("(warning)")));
    Ok(())
}

#[tokio::test]
async fn test_every_builtin_fixture_passes_on_its_exact_count() -> anyhow::Result<()> {
    let catalog = builtin_catalog()?;
    let fixtures: Vec<Fixture> = catalog.iter().cloned().collect();
    let (_dir, entries) = create_image_dir(&fixtures);

    let stub = entries.iter().fold(StubDetector::new(), |stub, (fixture, _, bytes)| {
        stub.on_image(bytes.clone(), Ok(people(fixture.expected.count as usize, 0.5)))
    });
    let runner = Runner::new(stub);
    let run = runner.run(&runnable(&entries)).await?;

    assert_eq!(run.results.len(), catalog.len());
    for result in &run.results {
        assert_eq!(
            result.verdict,
            Verdict::Pass,
            "{} failed: {:?}",
            result.fixture_id,
            result.failure_reasons
        );
        assert_eq!(result.detected(), Some(result.expected.count));
    }
    assert_eq!(run.summary.passed, catalog.len());
    Ok(())
}
