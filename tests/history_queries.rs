use spotter::{
    NewDetectionRecord, PageRequest, RecordFilter, RecordStore, SqliteRecordStore,
};

fn open_store(dir: &tempfile::TempDir) -> SqliteRecordStore {
    let db_path = dir.path().join("history.db");
    SqliteRecordStore::open(db_path.to_str().unwrap()).expect("open store")
}

fn seed(store: &mut dyn RecordStore, timestamp: i64, people_count: i64) -> i64 {
    store
        .insert(&NewDetectionRecord {
            timestamp,
            people_count,
            result_image_url: format!("/images/{}.jpg", spotter::new_request_id()),
            original_filename: format!("upload_{timestamp}.jpg"),
        })
        .expect("insert record")
        .id
}

#[test]
fn orders_by_timestamp_desc_with_stable_ties() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    let first = seed(&mut store, 1000, 1);
    let second = seed(&mut store, 3000, 2);
    let third = seed(&mut store, 1000, 3);

    let (records, total) = store
        .query(&RecordFilter::default(), &PageRequest::default())
        .unwrap();
    assert_eq!(total, 3);
    let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![second, first, third]);
}

#[test]
fn pagination_windows_the_ordered_set() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    for i in 0..25 {
        seed(&mut store, 1000 + i, i);
    }

    let page = PageRequest::new(5, 10).unwrap();
    let (records, total) = store.query(&RecordFilter::default(), &page).unwrap();
    assert_eq!(total, 25);
    assert_eq!(records.len(), 10);
    // newest is timestamp 1024; skipping 5 lands on 1019
    assert_eq!(records[0].timestamp, 1019);
    assert_eq!(records[9].timestamp, 1010);
}

#[test]
fn pagination_beyond_the_end_is_empty_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    seed(&mut store, 1000, 1);

    let page = PageRequest::new(50, 10).unwrap();
    let (records, total) = store.query(&RecordFilter::default(), &page).unwrap();
    assert_eq!(total, 1);
    assert!(records.is_empty());
}

#[test]
fn people_count_filters_are_inclusive() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    for count in 0..6 {
        seed(&mut store, 1000 + count, count);
    }

    let filter = RecordFilter {
        min_people: Some(2),
        max_people: Some(4),
        ..Default::default()
    };
    let (records, total) = store.query(&filter, &PageRequest::default()).unwrap();
    assert_eq!(total, 3);
    assert!(records
        .iter()
        .all(|r| (2..=4).contains(&r.people_count)));
    assert_eq!(store.count(&filter).unwrap(), 3);
}

#[test]
fn empty_people_range_yields_zero_and_empty_page() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    for count in 0..6 {
        seed(&mut store, 1000 + count, count);
    }

    let filter = RecordFilter {
        min_people: Some(5),
        max_people: Some(2),
        ..Default::default()
    };
    let (records, total) = store.query(&filter, &PageRequest::default()).unwrap();
    assert_eq!(total, 0);
    assert!(records.is_empty());
}

#[test]
fn date_filters_are_inclusive_and_combine_with_people_filters() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    seed(&mut store, 100, 1);
    seed(&mut store, 200, 1);
    seed(&mut store, 300, 5);
    seed(&mut store, 400, 1);

    let filter = RecordFilter {
        date_from: Some(200),
        date_to: Some(300),
        ..Default::default()
    };
    assert_eq!(store.count(&filter).unwrap(), 2);

    let filter = RecordFilter {
        date_from: Some(200),
        date_to: Some(400),
        max_people: Some(1),
        ..Default::default()
    };
    let (records, total) = store.query(&filter, &PageRequest::default()).unwrap();
    assert_eq!(total, 2);
    assert_eq!(records[0].timestamp, 400);
    assert_eq!(records[1].timestamp, 200);
}

#[test]
fn get_by_id_round_trips_and_misses_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    let id = seed(&mut store, 1234, 2);

    let record = store.get_by_id(id).unwrap().expect("record exists");
    assert_eq!(record.timestamp, 1234);
    assert_eq!(record.people_count, 2);
    assert!(store.get_by_id(id + 100).unwrap().is_none());
}

#[test]
fn records_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("history.db");
    {
        let mut store = SqliteRecordStore::open(db_path.to_str().unwrap()).unwrap();
        seed(&mut store, 777, 3);
    }
    let store = SqliteRecordStore::open(db_path.to_str().unwrap()).unwrap();
    let record = store.get_by_id(1).unwrap().expect("persisted record");
    assert_eq!(record.timestamp, 777);
}
