use chrono::{DateTime, TimeZone, Utc};
use timeshard::{PartitionConfig, PartitionStrategy, TimeshardError};

const ALL_STRATEGIES: [PartitionStrategy; 4] = [
    PartitionStrategy::Yearly,
    PartitionStrategy::Monthly,
    PartitionStrategy::Weekly,
    PartitionStrategy::Daily,
];

fn ts(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

fn config_for(strategy: PartitionStrategy) -> PartitionConfig {
    PartitionConfig::new("/tmp/timeshard-naming", "/tmp/timeshard-naming/main.db")
        .with_strategy(strategy)
}

#[test]
fn each_strategy_names_buckets_with_sortable_components() {
    let instant = ts(2024, 3, 7);
    assert_eq!(
        PartitionStrategy::Yearly.partition_name(instant),
        "partition_2024"
    );
    assert_eq!(
        PartitionStrategy::Monthly.partition_name(instant),
        "partition_2024_03"
    );
    assert_eq!(
        PartitionStrategy::Weekly.partition_name(instant),
        "partition_2024_w10"
    );
    assert_eq!(
        PartitionStrategy::Daily.partition_name(instant),
        "partition_2024_03_07"
    );
}

#[test]
fn name_and_range_round_trip_across_strategies() {
    let instants = [
        ts(2023, 6, 15),
        ts(2024, 2, 29),
        ts(2024, 12, 31),
        ts(2021, 1, 1),
    ];
    for strategy in ALL_STRATEGIES {
        for instant in instants {
            let name = strategy.partition_name(instant);
            let (start, end) = strategy.partition_range(&name).unwrap();
            assert!(
                start <= instant && instant < end,
                "{name}: {instant} outside [{start}, {end})"
            );
            // The bucket start names the same bucket.
            assert_eq!(strategy.partition_name(start), name);
            // Buckets tile the timeline: this bucket's end starts the next.
            let next_name = strategy.partition_name(end);
            let (next_start, _) = strategy.partition_range(&next_name).unwrap();
            assert_eq!(next_start, end, "{name} -> {next_name} leaves a gap");
        }
    }
}

#[test]
fn weekly_names_use_the_iso_week_year_at_boundaries() {
    // January 1st can fall in the previous ISO year's last week.
    assert_eq!(
        PartitionStrategy::Weekly.partition_name(ts(2021, 1, 1)),
        "partition_2020_w53"
    );
    assert_eq!(
        PartitionStrategy::Weekly.partition_name(ts(2020, 12, 31)),
        "partition_2020_w53"
    );
    // Late December can already belong to next year's first week.
    assert_eq!(
        PartitionStrategy::Weekly.partition_name(ts(2024, 12, 30)),
        "partition_2025_w01"
    );
    assert_eq!(
        PartitionStrategy::Weekly.partition_name(ts(2019, 12, 30)),
        "partition_2020_w01"
    );

    // Weeks run Monday to Monday even when they straddle January 1st.
    let (start, end) = PartitionStrategy::Weekly
        .partition_range("partition_2020_w53")
        .unwrap();
    assert_eq!(start, Utc.with_ymd_and_hms(2020, 12, 28, 0, 0, 0).unwrap());
    assert_eq!(end, Utc.with_ymd_and_hms(2021, 1, 4, 0, 0, 0).unwrap());
}

#[test]
fn lexicographic_order_matches_chronological_order() {
    let monthly = config_for(PartitionStrategy::Monthly)
        .partition_names_between(ts(2023, 11, 15), ts(2024, 2, 10));
    assert_eq!(
        monthly,
        [
            "partition_2023_11",
            "partition_2023_12",
            "partition_2024_01",
            "partition_2024_02",
        ]
    );

    let daily = config_for(PartitionStrategy::Daily)
        .partition_names_between(ts(2024, 2, 28), ts(2024, 3, 1));
    assert_eq!(
        daily,
        [
            "partition_2024_02_28",
            "partition_2024_02_29",
            "partition_2024_03_01",
        ]
    );

    let weekly = config_for(PartitionStrategy::Weekly)
        .partition_names_between(ts(2020, 12, 20), ts(2021, 1, 10));
    assert_eq!(
        weekly,
        [
            "partition_2020_w51",
            "partition_2020_w52",
            "partition_2020_w53",
            "partition_2021_w01",
        ]
    );

    for names in [monthly, daily, weekly] {
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, names, "zero-padding must keep names sortable");
    }
}

#[test]
fn malformed_names_are_rejected() {
    let cases = [
        (PartitionStrategy::Monthly, "partition_"),
        (PartitionStrategy::Monthly, "partition_abc"),
        (PartitionStrategy::Monthly, "events_2024_01"),
        (PartitionStrategy::Monthly, "partition_2024_13"),
        (PartitionStrategy::Monthly, "partition_2024"),
        (PartitionStrategy::Weekly, "partition_2024_w60"),
        (PartitionStrategy::Weekly, "partition_2024_10"),
        (PartitionStrategy::Daily, "partition_2024_02_30"),
        (PartitionStrategy::Yearly, "partition_2024_01"),
    ];
    for (strategy, name) in cases {
        assert!(
            matches!(
                strategy.partition_range(name),
                Err(TimeshardError::MalformedPartitionName { .. })
            ),
            "{strategy:?} should reject {name:?}"
        );
    }
}
