//! Boa-backed script contexts for the render-process helper

use boa_engine::{Context, Source};

use crate::tick::{ScriptContext, ScriptResult};
use crate::{Result, SessionSettings};

/// One page's script execution context
pub struct BoaContext {
    id: u64,
    ctx: Context,
}

impl BoaContext {
    pub fn new(id: u64, settings: &SessionSettings) -> Self {
        let mut ctx = Context::default();
        if settings.script_loop_iteration_limit > 0 {
            ctx.runtime_limits_mut()
                .set_loop_iteration_limit(settings.script_loop_iteration_limit);
        }
        if settings.script_recursion_limit < usize::MAX {
            ctx.runtime_limits_mut()
                .set_recursion_limit(settings.script_recursion_limit);
        }
        Self { id, ctx }
    }
}

impl ScriptContext for BoaContext {
    fn id(&self) -> u64 {
        self.id
    }

    fn eval(&mut self, code: &str) -> Result<ScriptResult> {
        let res = match self.ctx.eval(Source::from_bytes(code.as_bytes())) {
            Ok(val) => {
                let value = match val.to_string(&mut self.ctx) {
                    Ok(s) => s.to_std_string_escaped(),
                    Err(_) => format!("{}", val.display()),
                };
                ScriptResult {
                    value,
                    is_error: false,
                }
            }
            Err(e) => ScriptResult {
                value: format!("Script thrown: {}", e),
                is_error: true,
            },
        };
        // Settle promise reactions queued by the script
        self.ctx.run_jobs();
        Ok(res)
    }
}
