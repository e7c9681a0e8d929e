//! A `Push` implementor forwarding each message to a shared list of receivers.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::rc::Rc;

use braid_communication::Push;

use crate::Data;
use crate::dataflow::channels::Message;
use crate::dataflow::endpoints::VertexOutput;
use crate::progress::Timestamp;

struct Shared<T, D> {
    pushers: RefCell<Vec<Box<dyn Push<Message<T, D>>>>>,
    /// Messages pushed while a fan-out was in progress, sent once it completes.
    deferred: RefCell<VecDeque<Option<Message<T, D>>>>,
}

/// The output endpoint of one vertex: fans each message out to every receiver attached to it.
///
/// Clones share the receiver list, so receivers attached while wiring cables are seen by the
/// buffer the vertex sends through. A receiver invoked directly may re-enter the vertex and push
/// to this output again; such messages queue behind the one being fanned out.
pub struct Output<T, D> {
    shared: Rc<Shared<T, D>>,
}

impl<T, D> Output<T, D> {
    /// Allocates an output with no receivers.
    pub fn new() -> Self {
        Output {
            shared: Rc::new(Shared {
                pushers: RefCell::new(Vec::new()),
                deferred: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// Drops every receiver.
    pub(crate) fn clear(&self) {
        self.shared.pushers.borrow_mut().clear();
        self.shared.deferred.borrow_mut().clear();
    }
}

impl<T: Clone, D: Clone> Output<T, D> {
    fn fan_out(pushers: &mut [Box<dyn Push<Message<T, D>>>], message: &mut Option<Message<T, D>>) {
        if let Some((last, rest)) = pushers.split_last_mut() {
            if let Some(message) = message {
                for pusher in rest.iter_mut() {
                    pusher.push(&mut Some(message.clone()));
                }
            }
            else {
                for pusher in rest.iter_mut() {
                    pusher.done();
                }
            }
            last.push(message);
        }
    }
}

impl<T, D> Default for Output<T, D> {
    fn default() -> Self { Self::new() }
}

impl<T, D> Clone for Output<T, D> {
    fn clone(&self) -> Self {
        Output { shared: Rc::clone(&self.shared) }
    }
}

impl<T: Clone, D: Clone> Push<Message<T, D>> for Output<T, D> {
    #[inline]
    fn push(&mut self, message: &mut Option<Message<T, D>>) {
        let mut pushers = match self.shared.pushers.try_borrow_mut() {
            Ok(pushers) => pushers,
            Err(_) => {
                self.shared.deferred.borrow_mut().push_back(message.take());
                return;
            }
        };
        Self::fan_out(&mut pushers, message);
        loop {
            let next = self.shared.deferred.borrow_mut().pop_front();
            match next {
                Some(mut message) => Self::fan_out(&mut pushers, &mut message),
                None => break,
            }
        }
    }
}

impl<T: Timestamp, D: Data> VertexOutput<T, D> for Output<T, D> {
    fn add_receiver(&self, receiver: Box<dyn Push<Message<T, D>>>) {
        self.shared.pushers.borrow_mut().push(receiver);
    }
    fn receivers(&self) -> usize {
        self.shared.pushers.borrow().len()
    }
}

impl<T, D> Debug for Output<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Output");
        if let Ok(shared) = self.shared.pushers.try_borrow() {
            debug.field("shared", &format!("{} pushers", shared.len()));
        } else {
            debug.field("shared", &"...");
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {

    use braid_communication::{Pull, Push};
    use braid_communication::allocator::Thread;

    use crate::dataflow::channels::{Message, Postmark};
    use crate::dataflow::endpoints::VertexOutput;
    use crate::progress::Pointstamp;
    use super::Output;

    #[test]
    fn every_receiver_sees_every_message() {
        let output = Output::<Pointstamp, u64>::new();
        let (pusher0, mut puller0) = Thread::new_from();
        let (pusher1, mut puller1) = Thread::new_from();
        output.add_receiver(Box::new(pusher0));
        output.add_receiver(Box::new(pusher1));
        assert_eq!(output.receivers(), 2);

        let mut sender = output.clone();
        sender.send(Message::new(Pointstamp::new(0), vec![1, 2, 3], Postmark::default(), 0, 0));

        assert_eq!(puller0.recv().map(|m| m.data), Some(vec![1, 2, 3]));
        assert_eq!(puller1.recv().map(|m| m.data), Some(vec![1, 2, 3]));
        assert!(puller0.recv().is_none());
    }
}
