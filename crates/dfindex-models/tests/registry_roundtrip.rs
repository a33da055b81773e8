//! Whole-registry behaviour over synthetic chains.

use dfindex_core::indexer::{IndexerConfig, Network};
use dfindex_core::types::{Block, ScriptPubKey, Transaction, Vin, Vout};
use dfindex_dftx::loan::{CreateLoanScheme, DestroyLoanScheme};
use dfindex_dftx::oracle::{AppointOracle, CurrencyAmount, CurrencyPair, SetOracleData, TokenPrice};
use dfindex_dftx::pool::{CreatePoolPair, PoolSwap};
use dfindex_dftx::token::CreateToken;
use dfindex_dftx::{DfTx, Hash32, Script};
use dfindex_models::{loan, oracle, poolpair, poolswap, supply, token, IndexContext, IndexerRegistry};
use dfindex_storage::Database;
use proptest::prelude::*;

const BLOCK_SPACING: i64 = 600;

fn txid(height: u32, n: u32) -> String {
    format!("{:056x}{n:08x}", height)
}

fn vout(n: u32, value: f64, script_hex: String) -> Vout {
    Vout {
        value,
        n,
        script_pub_key: ScriptPubKey {
            hex: script_hex,
            kind: String::new(),
            addresses: vec![],
        },
        token_id: 0,
    }
}

fn coinbase(height: u32) -> Transaction {
    Transaction {
        txid: txid(height, 0),
        vin: vec![Vin {
            coinbase: Some(format!("{height:08x}")),
            txid: None,
            vout: None,
            sequence: 0,
        }],
        vout: vec![vout(0, 2.0, "51".into())],
    }
}

fn spend_previous_coinbase(height: u32) -> Transaction {
    Transaction {
        txid: txid(height, 1),
        vin: vec![Vin {
            coinbase: None,
            txid: Some(txid(height - 1, 0)),
            vout: Some(0),
            sequence: 0,
        }],
        vout: vec![vout(0, 1.5, "52".into()), vout(1, 0.5, "51".into())],
    }
}

fn dftx_tx(height: u32, n: u32, dftx: &DfTx) -> Transaction {
    Transaction {
        txid: txid(height, n),
        vin: vec![],
        vout: vec![vout(0, 0.0, hex::encode(dftx.to_script()))],
    }
}

fn block(height: u32, ops: &[DfTx]) -> Block {
    let mut tx = vec![coinbase(height)];
    if height > 0 {
        tx.push(spend_previous_coinbase(height));
    }
    let first = tx.len() as u32;
    tx.extend(ops.iter().enumerate().map(|(i, op)| dftx_tx(height, first + i as u32, op)));
    let time = 1_600_000_000 + i64::from(height) * BLOCK_SPACING;
    Block {
        hash: format!("{height:064x}"),
        height,
        previous_hash: height.checked_sub(1).map(|p| format!("{p:064x}")),
        time,
        median_time: time,
        size: 0,
        tx,
    }
}

fn token(symbol: &str, is_dat: bool) -> DfTx {
    DfTx::CreateToken(CreateToken {
        symbol: symbol.into(),
        name: symbol.into(),
        decimal: 8,
        limit: 0,
        is_dat,
        tradeable: true,
        mintable: true,
    })
}

fn scheme(id: &str, rate: i64, update: u64) -> DfTx {
    DfTx::CreateLoanScheme(CreateLoanScheme {
        ratio: 150,
        rate,
        identifier: id.into(),
        update,
    })
}

/// Tokens 1 and 2, pool 3 and one oracle feeding BTC/USD.
fn genesis() -> Block {
    block(
        0,
        &[
            token("BTC", true),
            token("ETH", true),
            DfTx::CreatePoolPair(CreatePoolPair {
                token_a: 1,
                token_b: 2,
                commission: 0,
                owner_address: Script(vec![0x51]),
                status: true,
                pair_symbol: String::new(),
                custom_rewards: vec![],
            }),
            DfTx::AppointOracle(AppointOracle {
                script: Script(vec![0x51]),
                weightage: 1,
                price_feeds: vec![CurrencyPair::new("BTC", "USD")],
            }),
        ],
    )
}

fn oracle_id() -> Hash32 {
    // the appoint above is the 4th dftx after the coinbase
    Hash32::from_hex(&txid(0, 4)).unwrap()
}

#[derive(Debug, Clone)]
enum Op {
    Token(bool),
    Scheme(u8, i64, u32),
    ScheduledDestroy(u8, u32),
    Swap(bool, i64),
    Price(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<bool>().prop_map(Op::Token),
        (0u8..3, 1i64..500, 0u32..4).prop_map(|(s, r, d)| Op::Scheme(s, r, d)),
        (0u8..3, 1u32..4).prop_map(|(s, d)| Op::ScheduledDestroy(s, d)),
        (any::<bool>(), 1i64..1_000_000).prop_map(|(dir, a)| Op::Swap(dir, a)),
        (1i64..100_000_000).prop_map(Op::Price),
    ]
}

fn to_dftx(op: &Op, height: u32, n: usize, time: i64) -> DfTx {
    match op {
        Op::Token(dat) => token(&format!("T{height}x{n}"), *dat),
        Op::Scheme(s, rate, delay) => {
            let update = if *delay == 0 { 0 } else { u64::from(height + delay) };
            scheme(&format!("s{s}"), *rate, update)
        }
        Op::ScheduledDestroy(s, delay) => DfTx::DestroyLoanScheme(DestroyLoanScheme {
            identifier: format!("s{s}"),
            height: u64::from(height + delay),
        }),
        Op::Swap(forward, amount) => {
            let (from, to) = if *forward { (1, 2) } else { (2, 1) };
            DfTx::PoolSwap(PoolSwap {
                from_script: Script(vec![0x51]),
                from_token_id: from,
                from_amount: *amount,
                to_script: Script(vec![0x52]),
                to_token_id: to,
                max_price_integer: i64::MAX,
                max_price_fraction: i64::MAX,
            })
        }
        Op::Price(amount) => DfTx::SetOracleData(SetOracleData {
            oracle_id: oracle_id(),
            timestamp: time,
            token_prices: vec![TokenPrice {
                token: "BTC".into(),
                prices: vec![CurrencyAmount {
                    currency: "USD".into(),
                    amount: *amount,
                }],
            }],
        }),
    }
}

fn chain(ops: &[Vec<Op>]) -> Vec<Block> {
    let mut blocks = vec![genesis()];
    for (i, block_ops) in ops.iter().enumerate() {
        let height = i as u32 + 1;
        let time = 1_600_000_000 + i64::from(height) * BLOCK_SPACING;
        let dftx: Vec<DfTx> = block_ops
            .iter()
            .enumerate()
            .map(|(n, op)| to_dftx(op, height, n, time))
            .collect();
        blocks.push(block(height, &dftx));
    }
    blocks
}

fn context(from_height: u32) -> IndexContext {
    let mut config = IndexerConfig::for_network(Network::Regtest);
    config.from_height = from_height;
    config.volume_windows = vec![1800];
    IndexContext::offline(config)
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 24, ..ProptestConfig::default() })]

    #[test]
    fn invalidating_every_block_restores_every_state(
        ops in prop::collection::vec(prop::collection::vec(op(), 0..5), 1..8)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let db = Database::memory();
            let ctx = context(0);
            let registry = IndexerRegistry::default();
            let blocks = chain(&ops);

            let mut before = Vec::with_capacity(blocks.len());
            for b in &blocks {
                before.push(db.snapshot().await.unwrap());
                registry.index(&ctx, &db, b).await.unwrap();
            }
            for (b, expected) in blocks.iter().zip(before).rev() {
                registry.invalidate(&ctx, &db, b).await.unwrap();
                prop_assert_eq!(db.snapshot().await.unwrap(), expected);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn supply_totals_satisfy_the_recurrence(
        ops in prop::collection::vec(prop::collection::vec(op(), 0..3), 1..10)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let db = Database::memory();
            let ctx = context(0);
            let registry = IndexerRegistry::default();
            let blocks = chain(&ops);
            for b in &blocks {
                registry.index(&ctx, &db, b).await.unwrap();
            }
            for h in 1..blocks.len() as u32 {
                let prev = supply::total_at(&ctx, &db, h - 1).await.unwrap().unwrap();
                let delta = supply::delta_at(&db, h).await.unwrap().unwrap();
                let total = supply::total_at(&ctx, &db, h).await.unwrap().unwrap();
                prop_assert_eq!(total.minted, prev.minted + delta.minted);
                prop_assert_eq!(total.burned, prev.burned + delta.burned);
                prop_assert_eq!(total.locked, prev.locked + delta.locked);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}

fn plain_block(height: u32, ops: &[DfTx]) -> Block {
    let mut b = block(height, ops);
    // no spend: the chain starts above genesis
    b.tx.retain(|tx| tx.txid != txid(height, 1));
    b
}

#[tokio::test]
async fn loan_schemes_list_newest_created_first() {
    let db = Database::memory();
    let ctx = context(100);
    let registry = IndexerRegistry::default();
    let rates = [300_000_000, 280_000_000, 250_000_000, 220_000_000];
    for (i, rate) in rates.into_iter().enumerate() {
        let height = 100 + i as u32;
        let b = plain_block(height, &[scheme(&format!("s{}", i + 1), rate, 0)]);
        registry.index(&ctx, &db, &b).await.unwrap();
    }
    let listed: Vec<_> = loan::list(&db, 30).await.unwrap();
    let ids: Vec<_> = listed.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["s4", "s3", "s2", "s1"]);
    let rates: Vec<_> = listed.iter().map(|s| s.rate).collect();
    assert_eq!(rates, vec![220_000_000, 250_000_000, 280_000_000, 300_000_000]);
}

#[tokio::test]
async fn deferred_update_and_destroy_through_the_registry() {
    let db = Database::memory();
    let ctx = context(100);
    let registry = IndexerRegistry::default();

    for height in 100..=112 {
        let ops = match height {
            100 => vec![scheme("S", 300, 0)],
            101 => vec![scheme("S", 250, 110)],
            _ => vec![],
        };
        registry.index(&ctx, &db, &plain_block(height, &ops)).await.unwrap();
        if height == 105 {
            assert_eq!(loan::get(&db, "S").await.unwrap().unwrap().rate, 300);
        }
    }
    assert_eq!(loan::get(&db, "S").await.unwrap().unwrap().rate, 250);
    assert_eq!(loan::scheme_at(&db, "S", 105).await.unwrap().unwrap().rate, 300);
    assert_eq!(loan::scheme_at(&db, "S", 110).await.unwrap().unwrap().rate, 250);

    let db = Database::memory();
    for height in 100..=112 {
        let ops = match height {
            100 => vec![scheme("S", 300, 0)],
            101 => vec![scheme("S", 200, 111)],
            102 => vec![DfTx::DestroyLoanScheme(DestroyLoanScheme {
                identifier: "S".into(),
                height: 110,
            })],
            _ => vec![],
        };
        registry.index(&ctx, &db, &plain_block(height, &ops)).await.unwrap();
    }
    assert!(loan::get(&db, "S").await.unwrap().is_none());
    assert!(loan::scheme_at(&db, "S", 112).await.unwrap().is_none());
}

#[tokio::test]
async fn volume_bucket_rolls_over_without_swaps() {
    let db = Database::memory();
    let ctx = context(0);
    let registry = IndexerRegistry::default();
    let swap = DfTx::PoolSwap(PoolSwap {
        from_script: Script(vec![0x51]),
        from_token_id: 1,
        from_amount: 10,
        to_script: Script(vec![0x52]),
        to_token_id: 2,
        max_price_integer: i64::MAX,
        max_price_fraction: i64::MAX,
    });

    registry.index(&ctx, &db, &genesis()).await.unwrap();
    registry.index(&ctx, &db, &block(1, &[swap])).await.unwrap();
    let first = poolswap::latest_volume(&db, 3, 1800).await.unwrap().unwrap();
    assert_eq!((first.count, first.block.height), (1, 1));

    // 600s spacing: 1800s after genesis is height 3, still inside the window
    for h in 2..=3 {
        registry.index(&ctx, &db, &block(h, &[])).await.unwrap();
    }
    assert_eq!(poolswap::latest_volume(&db, 3, 1800).await.unwrap().unwrap().block.height, 1);

    registry.index(&ctx, &db, &block(4, &[])).await.unwrap();
    let rolled = poolswap::latest_volume(&db, 3, 1800).await.unwrap().unwrap();
    assert_eq!((rolled.count, rolled.block.height), (0, 4));
}

#[tokio::test]
async fn oracle_price_aggregates_in_block() {
    let db = Database::memory();
    let ctx = context(0);
    let registry = IndexerRegistry::default();
    registry.index(&ctx, &db, &genesis()).await.unwrap();
    let b = block(1, &[to_dftx(&Op::Price(4_200_000_000), 1, 0, 1_600_000_000 + BLOCK_SPACING)]);
    registry.index(&ctx, &db, &b).await.unwrap();

    let price = oracle::latest_price(&db, &CurrencyPair::new("BTC", "USD")).await.unwrap().unwrap();
    assert_eq!((price.amount, price.active, price.block.height), (4_200_000_000, 1, 1));
}

#[tokio::test]
async fn dfi_pool_indexes_and_rolls_back() {
    let db = Database::memory();
    let ctx = context(0);
    let registry = IndexerRegistry::default();
    let first = block(0, &[token("BTC", true)]);
    let pool = block(
        1,
        &[DfTx::CreatePoolPair(CreatePoolPair {
            token_a: 0,
            token_b: 1,
            commission: 0,
            owner_address: Script(vec![0x51]),
            status: true,
            pair_symbol: String::new(),
            custom_rewards: vec![],
        })],
    );

    registry.index(&ctx, &db, &first).await.unwrap();
    let after_first = db.snapshot().await.unwrap();
    registry.index(&ctx, &db, &pool).await.unwrap();

    let symbols: Vec<_> = token::list(&db).await.unwrap().into_iter().map(|t| t.symbol_key).collect();
    assert_eq!(symbols, vec!["DFI", "BTC", "DFI-BTC"]);
    let created = poolpair::require_by_tokens(&db, 0, 1).await.unwrap();
    assert_eq!((created.pool_pair_id, created.pair_symbol.as_str()), (2, "DFI-BTC"));

    registry.invalidate(&ctx, &db, &pool).await.unwrap();
    assert_eq!(db.snapshot().await.unwrap(), after_first);
    registry.invalidate(&ctx, &db, &first).await.unwrap();
    assert!(db.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn native_token_is_seeded_only_at_the_start_height() {
    let db = Database::memory();
    let ctx = context(100);
    let registry = IndexerRegistry::default();
    registry.index(&ctx, &db, &plain_block(100, &[])).await.unwrap();
    registry.index(&ctx, &db, &plain_block(101, &[])).await.unwrap();

    let dfi = token::require(&db, supply::DFI).await.unwrap();
    assert_eq!((dfi.symbol_key.as_str(), dfi.is_dat, dfi.creation_height), ("DFI", false, 100));

    registry.invalidate(&ctx, &db, &plain_block(101, &[])).await.unwrap();
    assert!(token::get(&db, supply::DFI).await.unwrap().is_some());
    registry.invalidate(&ctx, &db, &plain_block(100, &[])).await.unwrap();
    assert!(token::get(&db, supply::DFI).await.unwrap().is_none());
}
