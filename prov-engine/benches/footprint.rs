use criterion::{criterion_group, criterion_main, Criterion};
use prov_core::{DocSubType, FileOp, FileOperation, FootprintType, NO_APP_ID};
use prov_engine::{artifact_footprint, classify, file_footprint, min_tree};
use std::hint::black_box;

const OPERATIONS: [FileOperation; 4] = [
    FileOperation::Create,
    FileOperation::AccessData,
    FileOperation::ModifyData,
    FileOperation::Delete,
];

fn bench_ops(count: usize, inodes: i64) -> Vec<FileOp> {
    (0..count)
        .map(|i| {
            let inode = 100 + (i as i64 * 7919) % inodes;
            let subtype = if inode % 5 == 0 {
                DocSubType::ModelPart
            } else {
                DocSubType::None
            };
            FileOp {
                id: format!("op-{}", i),
                inode_id: inode,
                parent_inode_id: 10 + inode % 10,
                project_inode_id: 1,
                dataset_inode_id: 2,
                inode_name: format!("file_{}", inode),
                project_name: "bench".to_string(),
                user_id: 1,
                app_id: NO_APP_ID.to_string(),
                operation: OPERATIONS[i % OPERATIONS.len()],
                timestamp: i as i64,
                logical_time: 0,
                partition_id: 0,
                doc_subtype: subtype,
                ml_id: (subtype != DocSubType::None).then(|| format!("model_{}", inode % 20)),
                xattr_name: None,
                xattr_val: None,
            }
        })
        .collect()
}

fn bench_footprint(c: &mut Criterion) {
    let ops = bench_ops(10_000, 2_000);

    c.bench_function("footprint/classify_all_10k", |b| {
        b.iter(|| {
            let classified = classify(file_footprint(black_box(&ops)), FootprintType::All);
            black_box(classified.len());
        });
    });

    c.bench_function("footprint/artifacts_10k", |b| {
        b.iter(|| {
            let classified = classify(artifact_footprint(black_box(&ops)), FootprintType::All);
            black_box(classified.len());
        });
    });

    let states: Vec<_> = classify(file_footprint(&ops), FootprintType::All)
        .into_values()
        .map(|(_, state)| state)
        .collect();
    c.bench_function("tree/min_tree_footprint", |b| {
        b.iter(|| {
            let tree = min_tree(black_box(states.clone()));
            black_box(tree.incomplete.len());
        });
    });
}

criterion_group!(benches, bench_footprint);
criterion_main!(benches);
