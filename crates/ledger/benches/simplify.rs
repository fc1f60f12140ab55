use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use splitledger_core::{Amount, ExpenseId, GroupId, MemberId, split_evenly};
use splitledger_ledger::{Balances, Expense, GroupLog, Share, group_balances, simplify};

/// Deterministic group log: every member pays once, split across a rotating
/// window of five members.
fn synthetic_log(members: usize) -> GroupLog {
    let ids: Vec<MemberId> = (0..members).map(|i| MemberId::new(format!("m{i:05}"))).collect();
    let group_id = GroupId::new();

    let expenses = (0..members)
        .map(|i| {
            let sharers: Vec<&MemberId> = (0..5).map(|k| &ids[(i + k * 7) % members]).collect();
            let total = Amount::new(1_000 + (i as i64 * 37) % 9_000);
            let amounts = split_evenly(total, sharers.len()).unwrap();
            let mut shares: Vec<Share> = Vec::new();
            for (member, amount) in sharers.into_iter().zip(amounts) {
                match shares.iter_mut().find(|s| &s.member == member) {
                    Some(existing) => existing.amount = existing.amount.checked_add(amount).unwrap(),
                    None => shares.push(Share { member: member.clone(), amount }),
                }
            }
            Expense {
                id: ExpenseId::new(),
                group_id,
                description: None,
                payer: ids[i].clone(),
                total,
                shares,
                created_at: Utc::now(),
                updated_at: None,
            }
        })
        .collect();

    GroupLog {
        members: ids,
        expenses,
        settlements: vec![],
    }
}

fn bench_simplify(c: &mut Criterion) {
    let mut group = c.benchmark_group("simplify");

    for members in [10usize, 100, 1_000, 10_000] {
        let log = synthetic_log(members);
        let balances: Balances = group_balances(&log).unwrap();

        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::new("group_balances", members), &log, |b, log| {
            b.iter(|| group_balances(black_box(log)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("simplify", members), &balances, |b, balances| {
            b.iter(|| simplify(black_box(balances)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_simplify);
criterion_main!(benches);
