/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Missing item data inside boolean expressions

use super::{at, store};
use expression::{Evaluator, Sample, SampleValue, Tristate};
use store::{HistoryCache, ItemId, TriggerId};

const CONFIGURATION: &str = r#"
[[hosts]]
id = 1
name = "web01"

[[items]]
id = 1
host_id = 1
key = "a"

[[items]]
id = 2
host_id = 1
key = "b"

[[triggers]]
id = 1
description = "A and B"
expression = "last(/web01/a) > 0 and last(/web01/b) > 0"

[[triggers]]
id = 2
description = "A or B"
expression = "last(/web01/a) > 0 or last(/web01/b) > 0"
"#;

async fn evaluate(trigger: u64, b: Option<f64>) -> Tristate {
    let store = store(CONFIGURATION);
    let snapshot = store.load();
    let history = HistoryCache::default();
    if let Some(b) = b {
        history.insert(ItemId(2), Sample::new(at(0), SampleValue::Numeric(b)), at(0));
    }

    let trigger = snapshot.trigger(TriggerId(trigger)).unwrap();
    expression::evaluate(&Evaluator::default(), &trigger.expression, &history, at(10))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_and_with_missing_operand() {
    // A has no data
    assert_eq!(evaluate(1, Some(0.0)).await, Tristate::False);
    assert_eq!(evaluate(1, Some(1.0)).await, Tristate::Unknown);
    assert_eq!(evaluate(1, None).await, Tristate::Unknown);
}

#[tokio::test]
async fn test_or_with_missing_operand() {
    assert_eq!(evaluate(2, Some(1.0)).await, Tristate::True);
    assert_eq!(evaluate(2, Some(0.0)).await, Tristate::Unknown);
    assert_eq!(evaluate(2, None).await, Tristate::Unknown);
}
