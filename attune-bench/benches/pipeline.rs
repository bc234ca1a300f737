//! Attune Benchmark Suite
//!
//! Throughput of the hot paths over a seeded synthetic workload:
//!   scorer_chain_single ............ one message, one user
//!   learner_chain_single ........... one inferred observation
//!   collaborative_user_message ..... full user-message kNN run
//!   collaborative_user_term ........ full user-term kNN run

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use attune_core::chain::{LearnerChain, ScorerChain};
use attune_core::collaborative::{CollaborativeScoreComputer, UserMessageComputer, UserTermComputer};
use attune_core::config::AttuneConfig;
use attune_core::metrics::PipelineCounters;
use attune_core::{
    InMemoryStore, Interest, LearningMessage, Message, MessageGroupId, MessageId, ScoredTerm,
    Term, UserId,
};

const USERS: u64 = 50;
const MESSAGES: u64 = 200;
const VOCABULARY: usize = 300;
const TERMS_PER_MESSAGE: usize = 8;
const RATINGS_PER_USER: usize = 20;

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default()
}

fn make_message(rng: &mut StdRng, id: u64) -> Message {
    let terms = (0..TERMS_PER_MESSAGE)
        .map(|_| {
            let word = format!("term{}", rng.gen_range(0..VOCABULARY));
            ScoredTerm::new(Term::word(word), rng.gen_range(0.05..1.0))
        })
        .collect();
    Message::new(MessageId(id), epoch() + Duration::minutes(id as i64), terms)
        .in_group(MessageGroupId(id % 4 + 1))
}

/// A store with messages and learned models, plus the chains over it.
struct Workload {
    store: Arc<InMemoryStore>,
    messages: Vec<Message>,
    scorer: ScorerChain,
    learner: LearnerChain,
}

fn workload(seed: u64) -> Workload {
    let mut rng = StdRng::seed_from_u64(seed);
    let store = Arc::new(InMemoryStore::new());
    let mut config = AttuneConfig::default();
    config.general.log_level = "warn".to_string();
    let _ = attune_core::metrics::init_tracing(&config.general);
    let counters = Arc::new(PipelineCounters::new());
    let scorer = ScorerChain::new(store.clone(), &config, counters.clone()).expect("scorer");
    let learner = LearnerChain::new(store.clone(), &config, counters).expect("learner");

    let messages: Vec<Message> = (1..=MESSAGES).map(|id| make_message(&mut rng, id)).collect();
    for m in &messages {
        store.insert_message(m.clone());
    }
    for user in 1..=USERS {
        for _ in 0..RATINGS_PER_USER {
            let m = &messages[rng.gen_range(0..messages.len())];
            let interest = Interest::ALL[rng.gen_range(0..Interest::ALL.len())];
            learner
                .learn(LearningMessage::rating(m.clone(), UserId(user), interest, m.published))
                .expect("learn");
        }
    }

    Workload {
        store,
        messages,
        scorer,
        learner,
    }
}

fn bench_scorer(c: &mut Criterion) {
    let w = workload(7);
    let now = epoch() + Duration::days(1);
    let message = &w.messages[17];

    c.bench_function("scorer_chain_single", |b| {
        b.iter(|| {
            let score = w
                .scorer
                .score(black_box(message), black_box(UserId(3)), now)
                .expect("score");
            black_box(score);
        });
    });
}

fn bench_learner(c: &mut Criterion) {
    let w = workload(11);
    let mut rng = StdRng::seed_from_u64(99);

    c.bench_function("learner_chain_single", |b| {
        b.iter_batched(
            || {
                let m = w.messages[rng.gen_range(0..w.messages.len())].clone();
                let user = UserId(rng.gen_range(1..=USERS));
                LearningMessage::inferred(m, user, Interest::High, epoch())
            },
            |learning| black_box(w.learner.learn(learning).expect("learn")),
            BatchSize::SmallInput,
        );
    });
}

fn bench_collaborative(c: &mut Criterion) {
    let w = workload(23);

    c.bench_function("collaborative_user_message", |b| {
        b.iter(|| {
            let mut computer = UserMessageComputer::new(Default::default());
            computer.init(w.store.as_ref()).expect("init");
            computer.run().expect("run");
            black_box(computer.message_scores().len());
        });
    });

    c.bench_function("collaborative_user_term", |b| {
        b.iter(|| {
            let mut computer = UserTermComputer::new(Default::default());
            computer.init(w.store.as_ref()).expect("init");
            computer.run().expect("run");
            black_box(computer.message_scores().len());
        });
    });
}

criterion_group!(benches, bench_scorer, bench_learner, bench_collaborative);
criterion_main!(benches);
