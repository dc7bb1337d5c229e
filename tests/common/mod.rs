#![allow(dead_code)]

use mlm_engine::cache::MemoryCache;
use mlm_engine::config::CompensationConfig;
use mlm_engine::domain::{
    Decimal, NewUser, Product, ProductId, Rank, RankId, RankRequirement, RewardRule, User,
};
use mlm_engine::notify::MemoryNotifier;
use mlm_engine::orchestration::{CompletePurchase, PurchaseOutcome};
use mlm_engine::{init_db, Repository, Services};
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestEnv {
    pub services: Services,
    pub repo: Arc<Repository>,
    pub cache: Arc<MemoryCache>,
    pub notifier: Arc<MemoryNotifier>,
    _temp_dir: TempDir,
}

pub async fn setup() -> TestEnv {
    setup_with(CompensationConfig::default(), MemoryNotifier::new()).await
}

pub async fn setup_with(config: CompensationConfig, notifier: MemoryNotifier) -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let cache = Arc::new(MemoryCache::new());
    let notifier = Arc::new(notifier);
    let services = Services::new(repo.clone(), cache.clone(), notifier.clone(), config);
    TestEnv {
        services,
        repo,
        cache,
        notifier,
        _temp_dir: temp_dir,
    }
}

pub fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

impl TestEnv {
    pub async fn register(&self, name: &str, sponsor: Option<&User>) -> User {
        self.services
            .genealogy
            .register_user(&NewUser::new(name, sponsor.map(|s| s.id.clone())))
            .await
            .unwrap()
    }

    /// A straight line of `len` members; index 0 is the root.
    pub async fn chain(&self, len: usize) -> Vec<User> {
        let mut members: Vec<User> = Vec::with_capacity(len);
        for i in 0..len {
            let user = self.register(&format!("member-{}", i), members.last()).await;
            members.push(user);
        }
        members
    }

    /// A perfect tree with `fanout` children per node and `depth` levels
    /// below the root. Returns the root.
    pub async fn perfect_tree(&self, fanout: usize, depth: usize) -> User {
        let root = self.register("root", None).await;
        let mut frontier = vec![root.clone()];
        for level in 1..=depth {
            let mut next = Vec::new();
            for parent in &frontier {
                for i in 0..fanout {
                    let name = format!("{}-{}-{}", parent.name, level, i);
                    next.push(self.register(&name, Some(parent)).await);
                }
            }
            frontier = next;
        }
        root
    }

    pub async fn product(&self, id: &str, price: &str, pv: &str) -> Product {
        let product = Product {
            id: ProductId::new(id),
            name: format!("Product {}", id),
            price: d(price),
            pv_value: d(pv),
        };
        self.repo.insert_product(&product).await.unwrap();
        product
    }

    pub async fn percentage_rule(&self, product: &Product, level: i64, percentage: &str) {
        self.repo
            .upsert_rebate_config(
                &product.id,
                level,
                &RewardRule::Percentage {
                    percentage: d(percentage),
                },
            )
            .await
            .unwrap();
    }

    pub async fn buy(&self, buyer: &User, product: &Product, quantity: i64) -> PurchaseOutcome {
        self.services
            .orchestrator
            .complete_purchase(&CompletePurchase {
                purchase_id: None,
                buyer_id: buyer.id.clone(),
                product_id: product.id.clone(),
                quantity,
            })
            .await
            .unwrap()
    }

    pub async fn rank(&self, id: &str, level: i64) -> Rank {
        let rank = Rank {
            id: RankId::new(id),
            name: id.to_string(),
            level,
            benefit_multiplier: None,
        };
        self.repo.insert_rank(&rank).await.unwrap();
        rank
    }

    pub async fn requirement(&self, rank: &Rank, direct: i64, personal_sales: &str) {
        self.repo
            .upsert_requirement(&RankRequirement {
                rank_id: rank.id.clone(),
                min_personal_sales: d(personal_sales),
                min_group_sales: Decimal::zero(),
                min_direct_downline: direct,
                min_qualified_downline: 0,
                qualified_rank_level: 0,
            })
            .await
            .unwrap();
    }

    pub async fn balance(&self, user: &User) -> Decimal {
        self.repo
            .get_user(&user.id)
            .await
            .unwrap()
            .unwrap()
            .wallet_balance
    }
}
