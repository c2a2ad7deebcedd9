use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Cart, CartDelta};
use std::hint::black_box;

fn make_cart(user: i64, range: std::ops::Range<i64>) -> Cart {
    let books: Vec<i64> = range.collect();
    Cart::from_raw(user, &books).unwrap()
}

fn bench_construct_with_duplicates(c: &mut Criterion) {
    let books: Vec<i64> = (1..=200).chain(1..=200).collect();

    c.bench_function("domain/construct_400_ids_with_duplicates", |b| {
        b.iter(|| Cart::from_raw(1, black_box(&books)).unwrap());
    });
}

fn bench_delta_small(c: &mut Criterion) {
    let previous = make_cart(1, 1..6);
    let desired = make_cart(1, 3..9);

    c.bench_function("domain/delta_5_books", |b| {
        b.iter(|| CartDelta::between(black_box(&desired), Some(black_box(&previous))));
    });
}

fn bench_delta_large(c: &mut Criterion) {
    let previous = make_cart(1, 1..501);
    let desired = make_cart(1, 250..751);

    c.bench_function("domain/delta_500_books", |b| {
        b.iter(|| CartDelta::between(black_box(&desired), Some(black_box(&previous))));
    });
}

criterion_group!(
    benches,
    bench_construct_with_duplicates,
    bench_delta_small,
    bench_delta_large,
);
criterion_main!(benches);
