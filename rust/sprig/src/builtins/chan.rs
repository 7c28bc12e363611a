//! Channel and task natives.

use super::{register, want, want_at_least};
use crate::channel::Channel;
use crate::error::SprigError;
use crate::interp::Interp;
use crate::values::Value;

fn as_channel(v: &Value) -> Result<&Channel, SprigError> {
    match v {
        Value::Channel(ch) => Ok(ch),
        other => Err(SprigError::Type(format!(
            "expected a channel, got {}",
            other.type_name()
        ))),
    }
}

pub fn install(interp: &mut Interp) {
    register(interp, "chan", |_, args| match args.len() {
        0 => Ok(Value::Channel(Channel::unbounded())),
        1 => {
            let cap = args[0].as_int().ok_or_else(|| {
                SprigError::Type("channel capacity must be an integer".into())
            })?;
            if cap < 0 {
                return Err(SprigError::Type(
                    "channel capacity must be non-negative".into(),
                ));
            }
            Ok(Value::Channel(Channel::bounded(cap as usize)))
        }
        n => Err(SprigError::Arity(format!(
            "`chan` expects 0 or 1, got {}",
            n
        ))),
    });
    register(interp, "send!", |_, args| {
        want("send!", &args, 2)?;
        as_channel(&args[0])?.send(args[1].clone())?;
        Ok(Value::Null)
    });
    register(interp, "recv!", |_, args| {
        want("recv!", &args, 1)?;
        Ok(as_channel(&args[0])?.recv())
    });
    register(interp, "chan-len", |_, args| {
        want("chan-len", &args, 1)?;
        Ok(Value::Int(as_channel(&args[0])?.len() as i64))
    });

    // Run a function on a duplicated instance in a fresh thread. The
    // returned channel yields the task's result (or an error string).
    register(interp, "spawn", |interp, args| {
        want_at_least("spawn", &args, 1)?;
        let func = args[0]
            .as_function()
            .ok_or_else(|| {
                SprigError::Type(format!(
                    "`spawn` needs a function, got {}",
                    args[0].type_name()
                ))
            })?
            .clone();
        let call_args: Vec<Value> = args[1..].to_vec();
        let mut task = interp.duplicate();
        let result_chan = Channel::bounded(1);
        let done = result_chan.clone();
        std::thread::spawn(move || {
            let outcome = match task.apply(&func, call_args) {
                Ok(v) => v,
                Err(e) => Value::Str(format!("error: {}", e)),
            };
            let _ = done.send(outcome);
        });
        Ok(Value::Channel(result_chan))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str) -> Value {
        Interp::new().eval(src).unwrap()
    }

    #[test]
    fn test_channel_send_recv() {
        assert_eq!(
            eval("(let [ch (chan)] (send! ch 42) (recv! ch))"),
            Value::Int(42)
        );
    }

    #[test]
    fn test_chan_len() {
        assert_eq!(
            eval("(let [ch (chan 4)] (send! ch 1) (send! ch 2) (chan-len ch))"),
            Value::Int(2)
        );
    }

    #[test]
    fn test_spawn_returns_result_channel() {
        assert_eq!(
            eval("(defn work [a b] (+ a b)) (recv! (spawn work 20 22))"),
            Value::Int(42)
        );
    }

    #[test]
    fn test_spawned_task_sees_shared_globals() {
        assert_eq!(
            eval("(def base 40) (defn job [] (+ base 2)) (recv! (spawn job))"),
            Value::Int(42)
        );
    }
}
