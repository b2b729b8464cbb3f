use mdscatter::core::value::Value;

/// Values the CLI supplies for parameters that neither the file nor `--set` gave.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultsConfig {
    /// Worker count from `-j`.
    pub threads: Option<usize>,
}

impl DefaultsConfig {
    pub fn running_mode(&self) -> Option<Value> {
        self.threads.map(|n| match n {
            0 | 1 => Value::from("monoprocessor"),
            n => Value::List(vec![Value::from("multiprocessor"), Value::from(n)]),
        })
    }
}
