//! Built-in functions and the allow-listed modules.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use rand::Rng;

use super::capabilities;
use super::interpreter::{fault, Exec, Fault, Interpreter};
use super::value::Value;

fn number(args: &[Value], i: usize, func: &str, line: usize) -> Exec<f64> {
    match args.get(i) {
        Some(Value::Number(n)) => Ok(*n),
        Some(other) => Err(fault(
            line,
            format!(
                "{func}() argument {} must be a number, got {}",
                i + 1,
                other.type_name()
            ),
        )),
        None => Err(fault(line, format!("{func}() is missing argument {}", i + 1))),
    }
}

fn list<'v>(args: &'v [Value], i: usize, func: &str, line: usize) -> Exec<&'v [Value]> {
    match args.get(i) {
        Some(Value::List(items)) => Ok(items),
        Some(other) => Err(fault(
            line,
            format!(
                "{func}() argument {} must be a list, got {}",
                i + 1,
                other.type_name()
            ),
        )),
        None => Err(fault(line, format!("{func}() is missing argument {}", i + 1))),
    }
}

fn numbers(items: &[Value], func: &str, line: usize) -> Exec<Vec<f64>> {
    items
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                fault(
                    line,
                    format!("{func}() expects numbers, got {}", v.type_name()),
                )
            })
        })
        .collect()
}

/// `min`/`max` accept either one list or several numbers.
fn extremum(args: &[Value], func: &str, pick_max: bool, line: usize) -> Exec<Value> {
    let values = match args {
        [Value::List(items)] => numbers(items, func, line)?,
        _ => numbers(args, func, line)?,
    };
    let best = values.into_iter().reduce(|a, b| {
        let replace = if pick_max { b > a } else { b < a };
        if replace {
            b
        } else {
            a
        }
    });
    best.map(Value::Number)
        .ok_or_else(|| fault(line, format!("{func}() of an empty list")))
}

fn round_to(x: f64, digits: f64) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (x * factor).round() / factor
}

fn check_arity(name: &str, arity: Option<capabilities::Arity>, got: usize, line: usize) -> Exec<()> {
    match arity {
        Some(arity) if arity.accepts(got) => Ok(()),
        Some(arity) => Err(fault(
            line,
            format!("{name}() takes {arity}, {got} given"),
        )),
        None => Err(fault(line, format!("unknown function `{name}`"))),
    }
}

impl<'a> Interpreter<'a> {
    pub(super) fn call_builtin(&mut self, name: &str, args: Vec<Value>, line: usize) -> Exec<Value> {
        check_arity(name, capabilities::builtin(name), args.len(), line)?;

        let value = match name {
            "len" => match &args[0] {
                Value::Str(s) => Value::Number(s.chars().count() as f64),
                Value::List(items) => Value::Number(items.len() as f64),
                Value::Map(entries) => Value::Number(entries.len() as f64),
                other => {
                    return Err(fault(
                        line,
                        format!("len() of a {}", other.type_name()),
                    ))
                }
            },
            "range" => {
                let (start, end, step) = match args.len() {
                    1 => (0.0, number(&args, 0, name, line)?, 1.0),
                    2 => (number(&args, 0, name, line)?, number(&args, 1, name, line)?, 1.0),
                    _ => (
                        number(&args, 0, name, line)?,
                        number(&args, 1, name, line)?,
                        number(&args, 2, name, line)?,
                    ),
                };
                if step == 0.0 || !step.is_finite() {
                    return Err(fault(line, "range() step must be a non-zero number"));
                }
                let count = ((end - start) / step).ceil();
                let count = if count.is_finite() && count > 0.0 { count } else { 0.0 };
                if count > self.config.max_collection_len as f64 {
                    return Err(fault(
                        line,
                        format!(
                            "collection length {count} exceeds the limit of {}",
                            self.config.max_collection_len
                        ),
                    ));
                }
                Value::List(
                    (0..count as usize)
                        .map(|i| Value::Number(start + step * i as f64))
                        .collect(),
                )
            }
            "str" => {
                let s = args[0].to_string();
                self.check_str(&s, line)?;
                Value::Str(s)
            }
            "num" => match &args[0] {
                Value::Number(n) => Value::Number(*n),
                Value::Bool(b) => Value::Number(if *b { 1.0 } else { 0.0 }),
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Number)
                    .map_err(|_| fault(line, format!("num(): cannot parse {s:?}")))?,
                other => {
                    return Err(fault(
                        line,
                        format!("num() of a {}", other.type_name()),
                    ))
                }
            },
            "int" => Value::Number(number(&args, 0, name, line)?.trunc()),
            "abs" => Value::Number(number(&args, 0, name, line)?.abs()),
            "min" => extremum(&args, name, false, line)?,
            "max" => extremum(&args, name, true, line)?,
            "round" => {
                let digits = if args.len() == 2 {
                    number(&args, 1, name, line)?
                } else {
                    0.0
                };
                Value::Number(round_to(number(&args, 0, name, line)?, digits))
            }
            "append" => {
                let mut items = list(&args, 0, name, line)?.to_vec();
                self.check_len(items.len() + 1, line)?;
                items.push(args[1].clone());
                Value::List(items)
            }
            "slice" => {
                let len = match &args[0] {
                    Value::List(items) => items.len(),
                    Value::Str(s) => s.chars().count(),
                    other => {
                        return Err(fault(
                            line,
                            format!("slice() of a {}", other.type_name()),
                        ))
                    }
                };
                let clamp = |n: f64| (n.max(0.0) as usize).min(len);
                let start = clamp(number(&args, 1, name, line)?);
                let end = if args.len() == 3 {
                    clamp(number(&args, 2, name, line)?)
                } else {
                    len
                }
                .max(start);
                match &args[0] {
                    Value::List(items) => Value::List(items[start..end].to_vec()),
                    Value::Str(s) => Value::Str(s.chars().skip(start).take(end - start).collect()),
                    _ => Value::Nil,
                }
            }
            "keys" => match &args[0] {
                Value::Map(entries) => {
                    Value::List(entries.keys().cloned().map(Value::Str).collect())
                }
                other => {
                    return Err(fault(
                        line,
                        format!("keys() of a {}", other.type_name()),
                    ))
                }
            },
            "has" => match (&args[0], &args[1]) {
                (Value::Map(entries), Value::Str(key)) => Value::Bool(entries.contains_key(key)),
                (Value::List(items), needle) => Value::Bool(items.contains(needle)),
                (Value::Str(s), Value::Str(needle)) => Value::Bool(s.contains(needle.as_str())),
                (haystack, _) => {
                    return Err(fault(
                        line,
                        format!("has() of a {}", haystack.type_name()),
                    ))
                }
            },
            "type_of" => Value::Str(args[0].type_name().to_string()),
            other => return Err(fault(line, format!("unknown function `{other}`"))),
        };
        Ok(value)
    }

    pub(super) fn call_module(
        &mut self,
        module: &str,
        member: &str,
        args: Vec<Value>,
        line: usize,
    ) -> Exec<Value> {
        let qualified = format!("{module}.{member}");
        let spec = capabilities::module(module)
            .ok_or_else(|| fault(line, format!("unknown module `{module}`")))?;
        let arity = spec.function(member);
        if arity.is_none() && spec.constant(member).is_some() {
            return Err(fault(line, format!("`{qualified}` is a constant, not a function")));
        }
        check_arity(&qualified, arity, args.len(), line)?;

        match module {
            "math" => self.math(member, &args, &qualified, line),
            "random" => self.random(member, &args, &qualified, line),
            "time" => self.time(member, &args, &qualified, line),
            "collections" => self.collections(member, &args, &qualified, line),
            other => Err(fault(line, format!("unknown module `{other}`"))),
        }
    }

    fn math(&mut self, member: &str, args: &[Value], name: &str, line: usize) -> Exec<Value> {
        let x = || number(args, 0, name, line);
        let y = || number(args, 1, name, line);
        let n = match member {
            "floor" => x()?.floor(),
            "ceil" => x()?.ceil(),
            "sqrt" => {
                let v = x()?;
                if v < 0.0 {
                    return Err(fault(line, "math.sqrt() of a negative number"));
                }
                v.sqrt()
            }
            "pow" => x()?.powf(y()?),
            "exp" => x()?.exp(),
            "log" => {
                let v = x()?;
                if v <= 0.0 {
                    return Err(fault(line, "math.log() of a non-positive number"));
                }
                if args.len() == 2 {
                    v.log(y()?)
                } else {
                    v.ln()
                }
            }
            "log10" => {
                let v = x()?;
                if v <= 0.0 {
                    return Err(fault(line, "math.log10() of a non-positive number"));
                }
                v.log10()
            }
            "abs" => x()?.abs(),
            "min" => return extremum(args, name, false, line),
            "max" => return extremum(args, name, true, line),
            "round" => {
                let digits = if args.len() == 2 { y()? } else { 0.0 };
                round_to(x()?, digits)
            }
            "clamp" => {
                let (v, lo, hi) = (x()?, y()?, number(args, 2, name, line)?);
                if lo > hi {
                    return Err(fault(line, "math.clamp() lower bound above upper bound"));
                }
                v.clamp(lo, hi)
            }
            other => return Err(fault(line, format!("module `math` has no function `{other}`"))),
        };
        Ok(Value::Number(n))
    }

    fn random(&mut self, member: &str, args: &[Value], name: &str, line: usize) -> Exec<Value> {
        let value = match member {
            "random" => Value::Number(self.rng.gen::<f64>()),
            "uniform" => {
                let (lo, hi) = (number(args, 0, name, line)?, number(args, 1, name, line)?);
                if !(lo.is_finite() && hi.is_finite()) || lo > hi {
                    return Err(fault(line, "random.uniform() needs finite bounds with low <= high"));
                }
                Value::Number(lo + (hi - lo) * self.rng.gen::<f64>())
            }
            "randint" => {
                let (lo, hi) = (number(args, 0, name, line)?, number(args, 1, name, line)?);
                if lo.fract() != 0.0 || hi.fract() != 0.0 || lo > hi {
                    return Err(fault(line, "random.randint() needs integers with low <= high"));
                }
                Value::Number(self.rng.gen_range(lo as i64..=hi as i64) as f64)
            }
            "choice" => {
                let items = list(args, 0, name, line)?;
                if items.is_empty() {
                    return Err(fault(line, "random.choice() from an empty list"));
                }
                let i = self.rng.gen_range(0..items.len());
                items[i].clone()
            }
            "chance" => {
                let pct = number(args, 0, name, line)?;
                Value::Bool(self.rng.gen::<f64>() * 100.0 < pct)
            }
            other => {
                return Err(fault(line, format!("module `random` has no function `{other}`")))
            }
        };
        Ok(value)
    }

    fn time(&mut self, member: &str, args: &[Value], name: &str, line: usize) -> Exec<Value> {
        match member {
            "now" => Ok(Value::Number(
                chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            )),
            "monotonic" => Ok(Value::Number(self.epoch.elapsed().as_secs_f64())),
            "sleep" => {
                let secs = number(args, 0, name, line)?;
                if !secs.is_finite() || secs < 0.0 {
                    return Err(fault(line, "time.sleep() needs a non-negative number of seconds"));
                }
                let remaining = self.deadline.saturating_duration_since(Instant::now());
                // Compare as seconds first: huge values do not fit a Duration.
                if secs >= remaining.as_secs_f64() {
                    std::thread::sleep(remaining);
                    return Err(Fault::Timeout);
                }
                std::thread::sleep(Duration::from_secs_f64(secs));
                self.tick()?;
                Ok(Value::Nil)
            }
            other => Err(fault(line, format!("module `time` has no function `{other}`"))),
        }
    }

    fn collections(&mut self, member: &str, args: &[Value], name: &str, line: usize) -> Exec<Value> {
        let items = list(args, 0, name, line)?;
        let value = match member {
            "sum" => Value::Number(numbers(items, name, line)?.iter().sum()),
            "mean" => {
                let values = numbers(items, name, line)?;
                if values.is_empty() {
                    return Err(fault(line, "collections.mean() of an empty list"));
                }
                Value::Number(values.iter().sum::<f64>() / values.len() as f64)
            }
            "sorted" => {
                let mut sorted = items.to_vec();
                if sorted.iter().all(|v| matches!(v, Value::Number(_))) {
                    sorted.sort_by(|a, b| {
                        let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                        a.partial_cmp(&b).unwrap_or(Ordering::Equal)
                    });
                } else if sorted.iter().all(|v| matches!(v, Value::Str(_))) {
                    sorted.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
                } else {
                    return Err(fault(
                        line,
                        "collections.sorted() needs all numbers or all strings",
                    ));
                }
                Value::List(sorted)
            }
            "reversed" => Value::List(items.iter().rev().cloned().collect()),
            "first" => items.first().cloned().unwrap_or_default(),
            "last" => items.last().cloned().unwrap_or_default(),
            "count" => Value::Number(items.iter().filter(|v| *v == &args[1]).count() as f64),
            other => {
                return Err(fault(
                    line,
                    format!("module `collections` has no function `{other}`"),
                ))
            }
        };
        Ok(value)
    }
}
