use rhashtable::*;

struct Item {
    key: u64,
    link: Link<Item>,
}

impl Entry for Item {
    type Key = u64;

    fn key(&self) -> &u64 {
        &self.key
    }

    fn link(&self) -> &Link<Self> {
        &self.link
    }
}

fn items(n: u64) -> Vec<Item> {
    (0..n)
        .map(|key| Item {
            key,
            link: Link::new(),
        })
        .collect()
}

fn params() -> Params<u64> {
    Params::new().hash_fn(|k: &u64, seed| {
        let h = (k ^ seed).wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^ (h >> 33)
    })
}

fn assert_all_found(table: &HashTable<'_, Item>, items: &[Item]) {
    for item in items {
        match table.lookup(&item.key) {
            Some(found) => assert!(std::ptr::eq(found, item)),
            None => panic!("lost key {}", item.key),
        }
    }
}

#[test]
fn grows_with_load() {
    let items = items(1000);
    let table = HashTable::new(params().min_size(4)).unwrap();
    for item in &items {
        table.insert(item).unwrap();
        let size = table.size();
        assert!(size.is_power_of_two());
        assert!(table.len() * 100 <= size * 75);
    }
    // 1024 buckets would be over 75% full
    assert_eq!(table.size(), 2048);
    assert_eq!(table.len(), 1000);
    assert_all_found(&table, &items);
    table.free_and_destroy(|_| {});
}

#[test]
fn grows_past_threshold() {
    let items = items(128);
    let table = HashTable::new(params().min_size(4).max_size(1024)).unwrap();
    for item in &items {
        table.insert(item).unwrap();
    }
    assert_eq!(table.size(), 256);
    assert_all_found(&table, &items);
    table.free_and_destroy(|_| {});
}

#[test]
fn stops_at_max_size() {
    let items = items(500);
    let table = HashTable::new(params().max_size(128)).unwrap();
    for item in &items {
        table.insert(item).unwrap();
    }
    assert_eq!(table.size(), 128);
    assert_eq!(table.len(), 500);
    assert_all_found(&table, &items);
    table.free_and_destroy(|_| {});
}

#[test]
fn shrinks_with_load() {
    let items = items(1000);
    let table = HashTable::new(params().min_size(4)).unwrap();
    for item in &items {
        table.insert(item).unwrap();
    }
    assert_eq!(table.size(), 2048);

    for item in &items[10..] {
        assert!(table.remove(item));
        let size = table.size();
        assert!(size >= 4);
        assert!(size == 4 || table.len() * 100 >= size * 30);
    }
    // 10 entries fill 32 buckets to 31%, just above the shrink threshold
    assert_eq!(table.size(), 32);
    assert_all_found(&table, &items[..10]);

    for item in &items[..10] {
        assert!(table.remove(item));
    }
    assert_eq!(table.size(), 4);
    table.destroy();
}

#[test]
fn stops_at_min_size() {
    let items = items(200);
    let table = HashTable::new(params().min_size(64)).unwrap();
    for item in &items {
        table.insert(item).unwrap();
    }
    for item in &items {
        table.remove(item);
    }
    assert_eq!(table.size(), 64);
    table.destroy();
}

#[test]
fn manual_resize() {
    let items = items(50);
    let table = HashTable::new(params().auto_resize(false).nelem_hint(4)).unwrap();
    assert_eq!(table.size(), 8);
    for item in &items {
        table.insert(item).unwrap();
    }
    // chains just get longer
    assert_eq!(table.size(), 8);
    assert_all_found(&table, &items);

    table.expand().unwrap();
    assert_eq!(table.size(), 16);
    assert_all_found(&table, &items);

    table.shrink().unwrap();
    table.shrink().unwrap();
    assert_eq!(table.size(), 4);
    assert_all_found(&table, &items);

    table.run_pending_resize().unwrap();
    assert_eq!(table.size(), 128);
    assert_all_found(&table, &items);
    table.free_and_destroy(|_| {});
}

#[test]
fn custom_thresholds() {
    let items = items(64);
    let table = HashTable::new(
        params()
            .nelem_hint(1)
            .min_size(4)
            .grow_threshold(100)
            .shrink_threshold(10),
    )
    .unwrap();
    assert_eq!(table.size(), 4);
    for item in &items {
        table.insert(item).unwrap();
    }
    // growth only once every bucket holds more than one entry on average
    assert_eq!(table.size(), 64);

    for item in &items[7..] {
        table.remove(item);
    }
    assert_eq!(table.size(), 64);
    table.remove(&items[6]);
    // 6 entries are under 10% of 64, but not of 32
    assert_eq!(table.size(), 32);
    table.free_and_destroy(|_| {});
}

#[test]
fn thresholds_too_close_are_rejected() {
    // 70 entries would grow 128 buckets to 256, fall under 40% and shrink right back
    let err = HashTable::<Item>::new(params().grow_threshold(50).shrink_threshold(40)).err();
    assert!(matches!(err, Some(Error::InvalidParams(_))));
}

#[test]
fn tight_thresholds_settle() {
    let manual = items(70);
    let table = HashTable::new(
        params()
            .nelem_hint(1)
            .auto_resize(false)
            .grow_threshold(50)
            .shrink_threshold(24),
    )
    .unwrap();
    for item in &manual {
        table.insert(item).unwrap();
    }
    assert_eq!(table.size(), 4);

    table.run_pending_resize().unwrap();
    // 70 entries fill 256 buckets to 27%, above 24%
    assert_eq!(table.size(), 256);
    table.run_pending_resize().unwrap();
    assert_eq!(table.size(), 256);
    assert_all_found(&table, &manual);
    table.free_and_destroy(|_| {});

    // and the same under automatic resizing, one threshold crossing at a time
    let auto = items(70);
    let table = HashTable::new(params().nelem_hint(1).grow_threshold(50).shrink_threshold(24))
        .unwrap();
    for item in &auto {
        table.insert(item).unwrap();
    }
    assert_eq!(table.size(), 256);
    for item in &auto[..60] {
        assert!(table.remove(item));
    }
    // 10 entries: under 24% of 64, not of 32
    assert_eq!(table.size(), 32);
    assert_all_found(&table, &auto[60..]);
    table.free_and_destroy(|_| {});
}

#[test]
fn unique_keys_across_resizes() {
    let dups = items(300);
    let items = items(300);
    let table = HashTable::new(params().nelem_hint(1)).unwrap();
    for (item, dup) in items.iter().zip(&dups) {
        table.insert(item).unwrap();
        assert_eq!(table.insert(dup), Err(Error::KeyExists));
    }
    for dup in &dups {
        assert_eq!(table.insert(dup), Err(Error::KeyExists));
    }
    assert_eq!(table.len(), 300);
    assert_all_found(&table, &items);
    table.free_and_destroy(|_| {});
}
