#[cfg(test)]
mod index_tests;
#[cfg(test)]
mod instance_tests;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::gbean::info::{GBeanInfo, GBeanInfoBuilder, GBeanLifecycle, ValueType};
use crate::kernel::error::BoxError;

type Journal = Arc<Mutex<Vec<String>>>;

/// Target used across the GBean tests; writes its lifecycle to `journal`.
#[derive(Debug)]
struct Counter {
    name: String,
    count: i64,
    fail_start: bool,
    journal: Journal,
}

impl GBeanLifecycle for Counter {
    fn do_start(&mut self) -> Result<(), BoxError> {
        self.journal.lock().push("doStart".to_string());
        if self.fail_start {
            return Err("refusing to start".into());
        }
        Ok(())
    }

    fn do_stop(&mut self) -> Result<(), BoxError> {
        self.journal.lock().push("doStop".to_string());
        Ok(())
    }

    fn do_fail(&mut self) {
        self.journal.lock().push("doFail".to_string());
    }
}

/// `Counter` with a `name` constructor argument, a persistent `count`
/// attribute and two `increment` overloads.
fn counter_info(journal: &Journal) -> Arc<GBeanInfo> {
    let journal = Arc::clone(journal);
    let info = GBeanInfoBuilder::<Counter>::new("Counter")
        .constructor(&["name"], move |_, args| {
            journal.lock().push("construct".to_string());
            let name = args.first().and_then(Value::as_str).unwrap_or("anonymous");
            Ok(Counter {
                name: name.to_string(),
                count: 0,
                fail_start: name == "broken",
                journal: Arc::clone(&journal),
            })
        })
        .getter("getName", ValueType::String, |c| json!(c.name))
        .getter("getCount", ValueType::Integer, |c| json!(c.count))
        .setter("setCount", ValueType::Integer, |c, v| {
            c.journal.lock().push(format!("setCount({})", v));
            c.count = v.as_i64().ok_or("count must be an integer")?;
            Ok(())
        })
        .method("increment", &[], ValueType::Integer, |c, _| {
            c.count += 1;
            Ok(json!(c.count))
        })
        .method("increment", &[ValueType::Integer], ValueType::Integer, |c, args| {
            c.count += args[0].as_i64().unwrap_or(0);
            Ok(json!(c.count))
        })
        .persistent("count")
        .lifecycle()
        .build();
    Arc::new(info)
}
