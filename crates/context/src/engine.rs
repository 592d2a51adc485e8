//! The engine facade: wires the registry, turn store, and embedding index
//! behind the one externally consumed call, `assemble_context`.

use std::sync::Arc;

use sqlx::SqlitePool;

use {
    crate::{
        assembler::{AssembledContext, Assembler, AssemblyConfig},
        tokenizer::Tokenizer,
    },
    orac_common::{ActorId, EngineResult},
    orac_memory::{ChunkStore, Chunker, EmbeddingChunk, EmbeddingProvider, Indexer, SqliteChunkStore},
    orac_registry::Registry,
    orac_sessions::{NewTurn, Turn, TurnStore, UserStore},
};

pub struct ContextEngine {
    registry: Arc<Registry>,
    users: Arc<UserStore>,
    turns: Arc<TurnStore>,
    indexer: Arc<Indexer>,
    assembler: Assembler,
}

impl ContextEngine {
    /// Create all engine tables, in foreign-key dependency order.
    pub async fn init(pool: &SqlitePool) -> EngineResult<()> {
        UserStore::init(pool).await?;
        Registry::init(pool).await?;
        TurnStore::init(pool).await?;
        SqliteChunkStore::init(pool).await?;
        Ok(())
    }

    pub fn new(
        pool: SqlitePool,
        provider: Arc<dyn EmbeddingProvider>,
        tokenizer: Arc<dyn Tokenizer>,
        chunker: Box<dyn Chunker>,
        config: AssemblyConfig,
    ) -> Self {
        let registry = Arc::new(Registry::new(pool.clone()));
        let users = Arc::new(UserStore::new(pool.clone()));
        let turns = Arc::new(TurnStore::new(pool.clone()));
        let chunks: Arc<dyn ChunkStore> = Arc::new(SqliteChunkStore::new(pool));
        let indexer = Arc::new(Indexer::new(chunker, provider, chunks.clone()));
        let assembler = Assembler::new(
            turns.clone(),
            chunks,
            indexer.clone(),
            tokenizer,
            config,
        );
        Self {
            registry,
            users,
            turns,
            indexer,
            assembler,
        }
    }

    /// The engine's sole externally consumed entry point: the bounded
    /// context for answering `new_turn` on `session` with the named LLM.
    pub async fn assemble_context(
        &self,
        llm_name: &str,
        session: &str,
        new_turn: &Turn,
    ) -> EngineResult<AssembledContext> {
        let llm = self.registry.get(llm_name).await?;
        self.assembler.assemble(&llm, session, new_turn).await
    }

    pub async fn append_turn(&self, new: NewTurn, actor: &ActorId) -> EngineResult<Turn> {
        self.turns.append(new, actor).await
    }

    /// Index an appended turn's content for retrieval. Indexing happens
    /// regardless of the target LLM's context policy — policy governs the
    /// read side only.
    pub async fn index_turn(
        &self,
        turn: &Turn,
        actor: &ActorId,
    ) -> EngineResult<Vec<EmbeddingChunk>> {
        self.indexer.index_turn(turn, actor).await
    }

    /// Append and index in one call, awaiting searchability.
    pub async fn record_turn(&self, new: NewTurn, actor: &ActorId) -> EngineResult<Turn> {
        let turn = self.append_turn(new, actor).await?;
        self.index_turn(&turn, actor).await?;
        Ok(turn)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub fn turns(&self) -> &TurnStore {
        &self.turns
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use {
        super::*,
        crate::{
            assembler::{AssemblyWarning, ContextItem},
            tokenizer::HeuristicTokenizer,
        },
        async_trait::async_trait,
        orac_common::EngineError,
        orac_memory::{DistanceMetric, FixedWidthChunker},
        orac_registry::{ContextPolicy, LlmDefinition, NewLlm},
        orac_sessions::Role,
    };

    /// Deterministic embedding double: [char count, vowel count]. Texts
    /// with similar shape land close under Euclidean distance.
    struct FakeProvider {
        fail: AtomicBool,
    }

    impl FakeProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(EngineError::EmbeddingUnavailable("offline".into()));
            }
            let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count();
            Ok(vec![text.chars().count() as f32, vowels as f32])
        }

        fn model_name(&self) -> &str {
            "fake-embed"
        }

        fn provider_key(&self) -> &str {
            "fake"
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn metric(&self) -> DistanceMetric {
            DistanceMetric::Euclidean
        }
    }

    /// Tokenizer double that charges a flat rate per non-empty text.
    struct FlatTokenizer(usize);

    impl Tokenizer for FlatTokenizer {
        fn count_tokens(&self, text: &str) -> usize {
            if text.is_empty() { 0 } else { self.0 }
        }
    }

    struct Harness {
        pool: SqlitePool,
        engine: ContextEngine,
        provider: Arc<FakeProvider>,
        user_id: String,
        actor: ActorId,
    }

    async fn harness(tokenizer: Arc<dyn Tokenizer>) -> Harness {
        let pool = orac_common::db::connect_memory().await.unwrap();
        ContextEngine::init(&pool).await.unwrap();

        let provider = FakeProvider::new();
        let engine = ContextEngine::new(
            pool.clone(),
            provider.clone(),
            tokenizer,
            Box::new(FixedWidthChunker { max_chars: 100 }),
            AssemblyConfig::default(),
        );

        let actor = ActorId::from("tester");
        let user = engine
            .users()
            .create_user("ada", "Ada", None, &actor)
            .await
            .unwrap();

        Harness {
            pool,
            engine,
            provider,
            user_id: user.id,
            actor,
        }
    }

    async fn register(
        h: &Harness,
        name: &str,
        policy: ContextPolicy,
        max_tokens: Option<i64>,
    ) -> LlmDefinition {
        h.engine
            .registry()
            .register(
                NewLlm {
                    name: name.into(),
                    provider: "test".into(),
                    model: "test-model".into(),
                    context_policy: policy,
                    max_context_tokens: max_tokens,
                    enabled: true,
                    properties: serde_json::Value::Null,
                },
                &h.actor,
            )
            .await
            .unwrap()
    }

    async fn say(h: &Harness, session: &str, role: Role, text: &str, tokens: Option<i64>) -> Turn {
        h.engine
            .append_turn(
                NewTurn {
                    session: session.into(),
                    user_id: h.user_id.clone(),
                    role,
                    content: serde_json::json!(text),
                    llm_id: None,
                    tokens_used: tokens,
                    meta: serde_json::Value::Null,
                },
                &h.actor,
            )
            .await
            .unwrap()
    }

    fn turn_indexes(ctx: &AssembledContext) -> Vec<i64> {
        ctx.items
            .iter()
            .filter_map(|item| match item {
                ContextItem::Turn(t) => Some(t.turn_index),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn five_token_budget_keeps_only_the_latest_turn() {
        // Two 3-token turns under a 5-token budget: turn 1 fits, turn 0
        // does not (3 + 3 = 6 > 5).
        let h = harness(Arc::new(FlatTokenizer(3))).await;
        register(&h, "gpt", ContextPolicy::App, Some(5)).await;

        say(&h, "s1", Role::User, "hi", None).await;
        say(&h, "s1", Role::Assistant, "hello", None).await;
        let new_turn = say(&h, "s1", Role::User, "how are you?", None).await;

        let ctx = h
            .engine
            .assemble_context("gpt", "s1", &new_turn)
            .await
            .unwrap();

        assert_eq!(turn_indexes(&ctx), vec![1]);
        assert!(ctx.warnings.is_empty());
    }

    #[tokio::test]
    async fn model_policy_returns_full_history_for_any_budget() {
        let h = harness(Arc::new(FlatTokenizer(1000))).await;
        register(&h, "trusting", ContextPolicy::Model, Some(1)).await;
        register(&h, "unbounded", ContextPolicy::Model, None).await;

        for i in 0..4 {
            say(&h, "s1", Role::User, &format!("message {i}"), None).await;
        }
        let new_turn = say(&h, "s1", Role::User, "latest", None).await;

        for llm in ["trusting", "unbounded"] {
            let ctx = h
                .engine
                .assemble_context(llm, "s1", &new_turn)
                .await
                .unwrap();
            // Full history verbatim, in session order, no truncation.
            assert_eq!(turn_indexes(&ctx), vec![0, 1, 2, 3, 4]);
            assert!(ctx.warnings.is_empty());
        }
    }

    #[tokio::test]
    async fn app_budget_is_never_exceeded() {
        let h = harness(Arc::new(HeuristicTokenizer::default())).await;
        register(&h, "gpt", ContextPolicy::App, Some(20)).await;

        for i in 0..8 {
            // Mixed precomputed and estimated costs.
            let tokens = if i % 2 == 0 { Some(4 + i) } else { None };
            say(&h, "s1", Role::User, &"word ".repeat(6 + i as usize), tokens).await;
        }
        let new_turn = say(&h, "s1", Role::User, "query", None).await;

        let ctx = h
            .engine
            .assemble_context("gpt", "s1", &new_turn)
            .await
            .unwrap();

        let tokenizer = HeuristicTokenizer::default();
        let total: i64 = ctx
            .items
            .iter()
            .map(|item| match item {
                ContextItem::Turn(t) => t.tokens_used.unwrap_or_else(|| {
                    tokenizer.count_tokens(t.content.as_str().unwrap_or("")) as i64
                }),
                ContextItem::Chunk { chunk, .. } => {
                    tokenizer.count_tokens(&chunk.lossless_text) as i64
                },
                ContextItem::Truncated { text, .. } => tokenizer.count_tokens(text) as i64,
            })
            .sum();
        assert!(total <= 20, "assembled {total} tokens over a 20-token budget");
        assert!(!ctx.is_flagged(AssemblyWarning::BudgetTooSmall));
    }

    #[tokio::test]
    async fn null_budget_under_app_degrades_to_full_history_with_warning() {
        let h = harness(Arc::new(FlatTokenizer(3))).await;
        register(&h, "gpt", ContextPolicy::App, None).await;

        say(&h, "s1", Role::User, "one", None).await;
        say(&h, "s1", Role::Assistant, "two", None).await;
        let new_turn = say(&h, "s1", Role::User, "three", None).await;

        let ctx = h
            .engine
            .assemble_context("gpt", "s1", &new_turn)
            .await
            .unwrap();
        assert!(ctx.is_flagged(AssemblyWarning::UnboundedBudget));
        assert_eq!(turn_indexes(&ctx), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn pathological_budget_returns_truncated_turn_flagged() {
        let h = harness(Arc::new(HeuristicTokenizer::default())).await;
        register(&h, "tiny", ContextPolicy::App, Some(2)).await;

        say(&h, "s1", Role::User, &"x".repeat(40), None).await;
        let new_turn = say(&h, "s1", Role::User, "q", None).await;

        let ctx = h
            .engine
            .assemble_context("tiny", "s1", &new_turn)
            .await
            .unwrap();

        assert!(ctx.is_flagged(AssemblyWarning::BudgetTooSmall));
        assert_eq!(ctx.items.len(), 1);
        match &ctx.items[0] {
            ContextItem::Truncated { text, .. } => {
                // 2 tokens at ~4 chars/token.
                assert_eq!(text.chars().count(), 8);
            },
            other => panic!("expected truncated fallback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_recent_turn_still_yields_retrieved_chunks() {
        // The recent turn alone exceeds the budget, but an older indexed
        // turn has a chunk that fits: the context is that chunk, and the
        // truncated fallback is not taken.
        let h = harness(Arc::new(HeuristicTokenizer::default())).await;
        register(&h, "gpt", ContextPolicy::App, Some(5)).await;

        let old = say(&h, "s1", Role::User, "salty ocean airs", None).await;
        h.engine.index_turn(&old, &h.actor).await.unwrap();
        say(&h, "s1", Role::Assistant, &"verbose ".repeat(40), Some(100)).await;
        let new_turn = say(&h, "s1", Role::User, "salty ocean airs?", None).await;

        let ctx = h
            .engine
            .assemble_context("gpt", "s1", &new_turn)
            .await
            .unwrap();

        assert!(!ctx.is_flagged(AssemblyWarning::BudgetTooSmall));
        assert!(turn_indexes(&ctx).is_empty());
        assert_eq!(ctx.items.len(), 1);
        assert!(matches!(&ctx.items[0], ContextItem::Chunk { chunk, .. } if chunk.turn_id == old.id));
    }

    #[tokio::test]
    async fn dropped_turns_are_substituted_by_retrieved_chunks() {
        let h = harness(Arc::new(HeuristicTokenizer::default())).await;
        register(&h, "gpt", ContextPolicy::App, Some(12)).await;

        // An old turn too expensive to keep verbatim, indexed for retrieval.
        let old = say(&h, "s1", Role::User, "eerie oceanic ideas", Some(100)).await;
        h.engine.index_turn(&old, &h.actor).await.unwrap();
        // A cheap recent turn that fits.
        say(&h, "s1", Role::Assistant, "ok", Some(1)).await;

        // Query shaped like the old turn so its chunk ranks close.
        let new_turn = say(&h, "s1", Role::User, "more oceanic ideas?", None).await;

        let ctx = h
            .engine
            .assemble_context("gpt", "s1", &new_turn)
            .await
            .unwrap();

        // Chunk stands in for the dropped turn, ahead of the recent window.
        assert!(matches!(&ctx.items[0], ContextItem::Chunk { chunk, .. } if chunk.turn_id == old.id));
        assert!(matches!(&ctx.items[1], ContextItem::Turn(t) if t.turn_index == 1));
        assert!(ctx.warnings.is_empty());
    }

    #[tokio::test]
    async fn query_embedding_failure_degrades_to_recency_only() {
        let h = harness(Arc::new(FlatTokenizer(3))).await;
        register(&h, "gpt", ContextPolicy::App, Some(5)).await;

        let old = say(&h, "s1", Role::User, "ancient context", Some(100)).await;
        h.engine.index_turn(&old, &h.actor).await.unwrap();
        say(&h, "s1", Role::Assistant, "recent", None).await;
        let new_turn = say(&h, "s1", Role::User, "query", None).await;

        h.provider.fail.store(true, Ordering::SeqCst);
        let ctx = h
            .engine
            .assemble_context("gpt", "s1", &new_turn)
            .await
            .unwrap();

        assert!(ctx.is_flagged(AssemblyWarning::RetrievalUnavailable));
        assert_eq!(turn_indexes(&ctx), vec![1]);
        assert!(!ctx.items.iter().any(|i| matches!(i, ContextItem::Chunk { .. })));
    }

    #[tokio::test]
    async fn hybrid_caps_below_the_full_budget() {
        // Budget 10 with 0.8 headroom leaves 8 usable: two 3-token turns
        // fit, a third does not.
        let h = harness(Arc::new(FlatTokenizer(3))).await;
        register(&h, "careful", ContextPolicy::Hybrid, Some(10)).await;

        for i in 0..4 {
            say(&h, "s1", Role::User, &format!("m{i}"), None).await;
        }
        let new_turn = say(&h, "s1", Role::User, "q", None).await;

        let ctx = h
            .engine
            .assemble_context("careful", "s1", &new_turn)
            .await
            .unwrap();
        assert_eq!(turn_indexes(&ctx), vec![2, 3]);
    }

    #[tokio::test]
    async fn external_policy_returns_only_the_new_turn() {
        let h = harness(Arc::new(FlatTokenizer(3))).await;
        register(&h, "delegated", ContextPolicy::External, Some(100)).await;

        say(&h, "s1", Role::User, "history", None).await;
        let new_turn = say(&h, "s1", Role::User, "latest", None).await;

        let ctx = h
            .engine
            .assemble_context("delegated", "s1", &new_turn)
            .await
            .unwrap();
        assert_eq!(ctx.session, "s1");
        assert_eq!(ctx.items.len(), 1);
        assert!(matches!(&ctx.items[0], ContextItem::Turn(t) if t.id == new_turn.id));
    }

    #[tokio::test]
    async fn unknown_llm_is_not_found() {
        let h = harness(Arc::new(FlatTokenizer(3))).await;
        let new_turn = say(&h, "s1", Role::User, "hi", None).await;
        let err = h
            .engine
            .assemble_context("ghost", "s1", &new_turn)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn deleting_a_referenced_llm_is_rejected() {
        let h = harness(Arc::new(FlatTokenizer(3))).await;
        let llm = register(&h, "gpt", ContextPolicy::App, Some(100)).await;

        h.engine
            .append_turn(
                NewTurn {
                    session: "s1".into(),
                    user_id: h.user_id.clone(),
                    role: Role::User,
                    content: serde_json::json!("hi"),
                    llm_id: Some(llm.id.clone()),
                    tokens_used: None,
                    meta: serde_json::Value::Null,
                },
                &h.actor,
            )
            .await
            .unwrap();

        let err = h
            .engine
            .registry()
            .remove("gpt", &h.actor)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InUse { .. }));

        // Both the definition and the turn survive.
        assert!(h.engine.registry().get("gpt").await.is_ok());
        assert_eq!(h.engine.turns().history("s1", None, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_user_cascades_turns_and_chunks() {
        let h = harness(Arc::new(FlatTokenizer(3))).await;

        let turn = h
            .engine
            .record_turn(
                NewTurn {
                    session: "s1".into(),
                    user_id: h.user_id.clone(),
                    role: Role::User,
                    content: serde_json::json!("remember me"),
                    llm_id: None,
                    tokens_used: None,
                    meta: serde_json::Value::Null,
                },
                &h.actor,
            )
            .await
            .unwrap();

        h.engine
            .users()
            .put_preference(&h.user_id, "theme", serde_json::json!("dark"), None, &h.actor)
            .await
            .unwrap();

        let chunks: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM embedding_chunks WHERE turn_id = ?")
                .bind(&turn.id)
                .fetch_one(&h.pool)
                .await
                .unwrap();
        assert!(chunks > 0);

        h.engine.users().delete_user(&h.user_id, &h.actor).await.unwrap();

        let turns: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM turns")
            .fetch_one(&h.pool)
            .await
            .unwrap();
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_chunks")
            .fetch_one(&h.pool)
            .await
            .unwrap();
        let prefs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM preferences")
            .fetch_one(&h.pool)
            .await
            .unwrap();
        assert_eq!((turns, chunks, prefs), (0, 0, 0));
    }
}
