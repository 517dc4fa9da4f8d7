extern crate rxcore;
#[macro_use]
extern crate lazy_static;

mod common;

use common::CACHE_000;
use rxcore::randomx::memory::init_dataset_range;
use rxcore::{dataset_item_count, extend_dataset, Dataset, Flags};

#[test]
fn test_cache_words() {
    assert_eq!(CACHE_000.word(0), 0x191e0e1d23c02186);
    assert_eq!(CACHE_000.word(1568413), 0xf1b62fe6210bf8b1);
    assert_eq!(CACHE_000.word(33554431), 0x1f47f056d05cd99b);
}

#[test]
fn test_dataset_items_from_cache() {
    assert_eq!(CACHE_000.init_dataset_item(0)[0], 0x680588a85ae222db);
    assert_eq!(CACHE_000.init_dataset_item(10000000)[0], 0x7943a1f6186ffb72);
    assert_eq!(CACHE_000.init_dataset_item(20000000)[0], 0x9035244d718095e1);
    assert_eq!(CACHE_000.init_dataset_item(30000000)[0], 0x145a5091f7853099);
}

#[test]
fn test_dataset_item_count() {
    assert_eq!(dataset_item_count(), 34078719);
}

#[test]
fn test_partitioned_range_init() {
    let start = 12345;
    let count = 600;
    let mut whole = vec![0u64; count * 8];
    init_dataset_range(&CACHE_000, start, &mut whole);

    let mut parts = vec![0u64; count * 8];
    let (a, rest) = parts.split_at_mut(17 * 8);
    let (b, c) = rest.split_at_mut(400 * 8);
    init_dataset_range(&CACHE_000, start, a);
    init_dataset_range(&CACHE_000, start + 17, b);
    init_dataset_range(&CACHE_000, start + 417, c);

    assert_eq!(whole, parts);
    assert_eq!(&whole[8..16], &CACHE_000.init_dataset_item(start + 1)[..]);
}

#[test]
#[ignore]
fn test_full_dataset_matches_cache() {
    let dataset = extend_dataset(&CACHE_000, Flags::DEFAULT, 4).unwrap();
    for item in [0u64, 10000000, 20000000, 30000000, dataset_item_count() - 1].iter() {
        assert_eq!(dataset.item(*item), &CACHE_000.init_dataset_item(*item)[..]);
    }
}

#[test]
#[ignore]
fn test_dataset_range_init() {
    let mut dataset = Dataset::new(Flags::DEFAULT).unwrap();
    let last = dataset_item_count() - 100;
    dataset.init_range(&CACHE_000, last, 100);
    dataset.init_range(&CACHE_000, 30000000, 1);
    assert_eq!(dataset.item(30000000)[0], 0x145a5091f7853099);
    assert_eq!(dataset.item(last + 99), &CACHE_000.init_dataset_item(last + 99)[..]);
    assert_eq!(dataset.item(0), &[0u64; 8][..]);
}
