//! Ordered completion hooks consulted before the model service.
//!
//! Hooks are iterated in registration order. The first hook whose
//! `can_handle` returns true is asked to `handle` the sequence; a `Some`
//! completion short-circuits the service call, a `None` falls through to it.

use tracing::debug;

use crate::core::types::ChatSequence;
use crate::io::gateway::Completion;

pub trait CompletionHook {
    fn name(&self) -> &str;
    fn can_handle(&self, sequence: &ChatSequence) -> bool;
    fn handle(&self, sequence: &ChatSequence) -> Option<Completion>;
}

/// A completion produced by a hook.
#[derive(Debug, Clone, PartialEq)]
pub struct HookCompletion {
    pub hook: String,
    pub completion: Completion,
}

#[derive(Default)]
pub struct HookChain {
    hooks: Vec<Box<dyn CompletionHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Box<dyn CompletionHook>) {
        self.hooks.push(hook);
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    pub fn try_complete(&self, sequence: &ChatSequence) -> Option<HookCompletion> {
        let hook = self.hooks.iter().find(|h| h.can_handle(sequence))?;
        match hook.handle(sequence) {
            Some(completion) => {
                debug!(hook = hook.name(), "completion served by hook");
                Some(HookCompletion {
                    hook: hook.name().to_string(),
                    completion,
                })
            }
            None => {
                debug!(hook = hook.name(), "hook declined; falling through");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::io::gateway::Usage;

    struct FixedHook {
        name: &'static str,
        accepts: bool,
        reply: Option<&'static str>,
        handled: Cell<u32>,
    }

    impl FixedHook {
        fn boxed(name: &'static str, accepts: bool, reply: Option<&'static str>) -> Box<Self> {
            Box::new(Self {
                name,
                accepts,
                reply,
                handled: Cell::new(0),
            })
        }
    }

    impl CompletionHook for FixedHook {
        fn name(&self) -> &str {
            self.name
        }

        fn can_handle(&self, _: &ChatSequence) -> bool {
            self.accepts
        }

        fn handle(&self, _: &ChatSequence) -> Option<Completion> {
            self.handled.set(self.handled.get() + 1);
            self.reply.map(|content| Completion {
                content: content.to_string(),
                usage: Usage::default(),
                cost: None,
            })
        }
    }

    fn sequence() -> ChatSequence {
        ChatSequence {
            model: "m".to_string(),
            messages: Vec::new(),
            capacity: 100,
            reserved_completion: 10,
            prompt_tokens: 3,
            overflow: None,
        }
    }

    #[test]
    fn first_capable_hook_wins() {
        let mut chain = HookChain::new();
        chain.push(FixedHook::boxed("skip", false, Some("never")));
        chain.push(FixedHook::boxed("first", true, Some("one")));
        chain.push(FixedHook::boxed("second", true, Some("two")));

        let served = chain.try_complete(&sequence()).expect("served");
        assert_eq!(served.hook, "first");
        assert_eq!(served.completion.content, "one");
    }

    #[test]
    fn declining_hook_falls_through_to_service() {
        let mut chain = HookChain::new();
        chain.push(FixedHook::boxed("decline", true, None));
        chain.push(FixedHook::boxed("later", true, Some("unused")));
        assert_eq!(chain.try_complete(&sequence()), None);
        assert_eq!(chain.names(), vec!["decline", "later"]);
    }

    #[test]
    fn empty_chain_serves_nothing() {
        assert!(HookChain::new().try_complete(&sequence()).is_none());
    }
}
