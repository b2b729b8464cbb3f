use super::{Configured, Configurator, Context, Setting};
use crate::core::value::Value;
use crate::engine::config::ConfigError;
use nalgebra::Vector3;

pub const INTEGER: &str = "integer";
pub const FLOAT: &str = "float";
pub const BOOLEAN: &str = "boolean";
pub const STRING: &str = "string";
pub const VECTOR: &str = "vector";
pub const RANGE: &str = "range";

fn check_bounds<T: PartialOrd + ToString + Copy>(
    name: &'static str,
    value: T,
    mini: Option<T>,
    maxi: Option<T>,
) -> Result<T, ConfigError> {
    let below = mini.is_some_and(|m| value < m);
    let above = maxi.is_some_and(|m| value > m);
    if below || above {
        return Err(ConfigError::OutOfRange {
            name,
            value: value.to_string(),
            min: mini.map(|m| m.to_string()),
            max: maxi.map(|m| m.to_string()),
        });
    }
    Ok(value)
}

#[derive(Debug)]
struct IntegerConfigurator {
    mini: Option<i64>,
    maxi: Option<i64>,
    choices: Option<Vec<i64>>,
}

pub fn integer(setting: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    let choices = match setting.opt_list("choices")? {
        Some(items) => Some(
            items
                .iter()
                .map(Value::as_i64)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    ConfigError::invalid(setting.name, "integer choices must be integers")
                })?,
        ),
        None => None,
    };
    Ok(Box::new(IntegerConfigurator {
        mini: setting.opt_i64("mini")?,
        maxi: setting.opt_i64("maxi")?,
        choices,
    }))
}

impl Configurator for IntegerConfigurator {
    fn choices(&self) -> Option<Vec<String>> {
        self.choices
            .as_ref()
            .map(|c| c.iter().map(i64::to_string).collect())
    }

    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let n = match value {
            Value::Null => return Err(ctx.missing()),
            Value::Bool(_) => return Err(ctx.wrong_type("an integer", value)),
            v => v.as_i64().ok_or_else(|| ctx.wrong_type("an integer", v))?,
        };
        if let Some(choices) = &self.choices {
            if !choices.contains(&n) {
                return Err(ConfigError::UnknownChoice {
                    name: ctx.name(),
                    value: n.to_string(),
                    choices: self.choices().unwrap_or_default(),
                });
            }
        }
        check_bounds(ctx.name(), n, self.mini, self.maxi).map(Configured::Integer)
    }
}

#[derive(Debug)]
struct FloatConfigurator {
    mini: Option<f64>,
    maxi: Option<f64>,
}

pub fn float(setting: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(FloatConfigurator {
        mini: setting.opt_f64("mini")?,
        maxi: setting.opt_f64("maxi")?,
    }))
}

impl Configurator for FloatConfigurator {
    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let x = match value {
            Value::Null => return Err(ctx.missing()),
            v => v.as_f64().ok_or_else(|| ctx.wrong_type("a number", v))?,
        };
        if !x.is_finite() {
            return Err(ctx.invalid("value must be finite"));
        }
        check_bounds(ctx.name(), x, self.mini, self.maxi).map(Configured::Float)
    }
}

#[derive(Debug)]
struct BooleanConfigurator;

pub fn boolean(_: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(BooleanConfigurator))
}

impl Configurator for BooleanConfigurator {
    fn default_value(&self) -> Value {
        Value::Bool(false)
    }

    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        value
            .as_bool()
            .map(Configured::Bool)
            .ok_or_else(|| ctx.wrong_type("a boolean", value))
    }
}

#[derive(Debug)]
struct StringConfigurator {
    choices: Option<Vec<String>>,
}

pub fn string(setting: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    let choices = match setting.opt_list("choices")? {
        Some(items) => Some(
            items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    ConfigError::invalid(setting.name, "string choices must be strings")
                })?,
        ),
        None => None,
    };
    Ok(Box::new(StringConfigurator { choices }))
}

impl Configurator for StringConfigurator {
    fn choices(&self) -> Option<Vec<String>> {
        self.choices.clone()
    }

    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let s = match value {
            Value::Null => return Err(ctx.missing()),
            Value::Str(s) => s,
            other => return Err(ctx.wrong_type("a string", other)),
        };
        match &self.choices {
            None => Ok(Configured::Str(s.clone())),
            Some(choices) => choices
                .iter()
                .find(|c| c.eq_ignore_ascii_case(s))
                .map(|c| Configured::Str(c.clone()))
                .ok_or_else(|| ConfigError::UnknownChoice {
                    name: ctx.name(),
                    value: s.clone(),
                    choices: choices.clone(),
                }),
        }
    }
}

/// Parses a three-component numeric list.
pub(crate) fn parse_vector(value: &Value, ctx: &Context<'_>) -> Result<Vector3<f64>, ConfigError> {
    match value.as_list() {
        Some([x, y, z]) => {
            let component = |v: &Value| v.as_f64().ok_or_else(|| ctx.wrong_type("a number", v));
            Ok(Vector3::new(component(x)?, component(y)?, component(z)?))
        }
        _ => Err(ctx.wrong_type("a list of three numbers", value)),
    }
}

#[derive(Debug)]
struct VectorConfigurator {
    normalize: bool,
    not_null: bool,
}

pub fn vector(setting: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(VectorConfigurator {
        normalize: setting.opt_bool("normalize")?.unwrap_or(false),
        not_null: setting.opt_bool("not_null")?.unwrap_or(false),
    }))
}

impl Configurator for VectorConfigurator {
    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        if value.is_null() {
            return Err(ctx.missing());
        }
        let v = parse_vector(value, ctx)?;
        let norm = v.norm();
        if (self.not_null || self.normalize) && norm == 0.0 {
            return Err(ctx.invalid("vector must not be null"));
        }
        Ok(Configured::Vector(if self.normalize { v / norm } else { v }))
    }
}

/// `(first, last, step)` expanded to a sequence; `last` is included only when the
/// setting sets `include_last`.
#[derive(Debug)]
struct RangeConfigurator {
    integer: bool,
    include_last: bool,
    mini: Option<f64>,
    maxi: Option<f64>,
}

pub fn range(setting: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    let integer = match setting.opt_str("value_type")? {
        None | Some("float") => false,
        Some("int") => true,
        Some(other) => {
            return Err(ConfigError::UnknownChoice {
                name: setting.name,
                value: other.to_string(),
                choices: vec!["int".into(), "float".into()],
            });
        }
    };
    Ok(Box::new(RangeConfigurator {
        integer,
        include_last: setting.opt_bool("include_last")?.unwrap_or(false),
        mini: setting.opt_f64("mini")?,
        maxi: setting.opt_f64("maxi")?,
    }))
}

/// Points of `first, first + step, …` up to `last`, computed by index so the count does
/// not drift with accumulated rounding.
pub fn expand_range(first: f64, last: f64, step: f64, include_last: bool) -> Vec<f64> {
    let span = (last - first) / step;
    let count = if include_last {
        (span + 1e-9).floor() as usize + 1
    } else {
        (span - 1e-9).ceil().max(0.0) as usize
    };
    (0..count).map(|k| first + k as f64 * step).collect()
}

impl Configurator for RangeConfigurator {
    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let parts: Vec<&Value> = match value {
            Value::Null => return Err(ctx.missing()),
            Value::List(items) if items.len() == 3 => items.iter().collect(),
            Value::Table(table) => ["first", "last", "step"]
                .iter()
                .map(|k| table.get(*k).ok_or_else(|| ctx.missing()))
                .collect::<Result<_, _>>()?,
            other => return Err(ctx.wrong_type("[first, last, step]", other)),
        };
        let number = |v: &Value| {
            if self.integer {
                v.as_i64().map(|i| i as f64).ok_or_else(|| ctx.wrong_type("an integer", v))
            } else {
                v.as_f64().ok_or_else(|| ctx.wrong_type("a number", v))
            }
        };
        let (first, last, step) = (number(parts[0])?, number(parts[1])?, number(parts[2])?);
        if step <= 0.0 {
            return Err(ConfigError::OutOfRange {
                name: ctx.name(),
                value: step.to_string(),
                min: Some("0 (exclusive)".into()),
                max: None,
            });
        }
        if first > last {
            return Err(ctx.invalid(format!("first value {first} is above last value {last}")));
        }
        check_bounds(ctx.name(), first, self.mini, self.maxi)?;
        check_bounds(ctx.name(), last, self.mini, self.maxi)?;
        let values = expand_range(first, last, step, self.include_last);
        if values.is_empty() {
            return Err(ctx.invalid("range is empty"));
        }
        Ok(Configured::Range(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::configurators::{Parameters, resolve};
    use crate::engine::testing::test_engine;

    fn one(
        setting: Setting,
        value: Value,
    ) -> Result<crate::engine::configurators::Configuration, ConfigError> {
        let name = setting.name.to_string();
        resolve(&test_engine(), &[setting], &Parameters::from([(name, value)]))
    }

    #[test]
    fn integer_bounds_and_choices() {
        let bounded = || Setting::new("n", INTEGER).option("mini", 1).option("maxi", 5);
        assert_eq!(*one(bounded(), Value::Int(5)).unwrap().get::<i64>("n").unwrap(), 5);
        assert!(matches!(one(bounded(), Value::Int(6)), Err(ConfigError::OutOfRange { .. })));
        assert!(matches!(
            one(bounded(), Value::Bool(true)),
            Err(ConfigError::WrongType { expected: "an integer", found: "boolean", .. })
        ));
        let chosen = Setting::new("n", INTEGER).option("choices", vec![2, 4]);
        assert!(matches!(one(chosen, Value::Int(3)), Err(ConfigError::UnknownChoice { .. })));
    }

    #[test]
    fn floats_accept_integers() {
        let config = one(Setting::new("x", FLOAT).option("mini", 0.0), Value::Int(2)).unwrap();
        assert_eq!(*config.get::<f64>("x").unwrap(), 2.0);
    }

    #[test]
    fn string_choices_are_case_insensitive() {
        let setting = || Setting::new("s", STRING).option("choices", vec!["Linear", "Log"]);
        let config = one(setting(), Value::from("linear")).unwrap();
        assert_eq!(config.get::<String>("s").unwrap(), "Linear");
        assert!(one(setting(), Value::from("cubic")).is_err());
    }

    #[test]
    fn vectors_can_be_normalized() {
        let setting = || Setting::new("v", VECTOR).option("normalize", true);
        let config = one(setting(), Value::from(vec![0.0, 3.0, 4.0])).unwrap();
        let v = config.get::<Vector3<f64>>("v").unwrap();
        assert!((v.y - 0.6).abs() < 1e-12 && (v.z - 0.8).abs() < 1e-12);
        assert!(one(setting(), Value::from(vec![0.0, 0.0, 0.0])).is_err());
    }

    #[test]
    fn ranges_honour_inclusivity() {
        let inclusive = Setting::new("r", RANGE).option("include_last", true);
        let config = one(inclusive, Value::from(vec![0.0, 1.0, 0.25])).unwrap();
        assert_eq!(config.get::<Vec<f64>>("r").unwrap(), &[0.0, 0.25, 0.5, 0.75, 1.0]);

        let exclusive = Setting::new("r", RANGE).option("value_type", "int");
        let config = one(exclusive, Value::from(vec![0, 10, 3])).unwrap();
        assert_eq!(config.get::<Vec<f64>>("r").unwrap(), &[0.0, 3.0, 6.0, 9.0]);

        let backwards = Setting::new("r", RANGE);
        assert!(one(backwards, Value::from(vec![2.0, 1.0, 0.5])).is_err());
    }
}
