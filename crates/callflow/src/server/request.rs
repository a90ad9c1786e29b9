use crate::call::CallContext;

/// What a handler receives: the call's context and its request, either a
/// single message or a [`Streaming`](crate::stream::Streaming) of them.
#[derive(Debug)]
pub struct Request<T> {
    context: CallContext,
    message: T,
}

impl<T> Request<T> {
    pub(crate) const fn new(context: CallContext, message: T) -> Self {
        Self { context, message }
    }

    pub const fn context(&self) -> &CallContext {
        &self.context
    }

    pub const fn get_ref(&self) -> &T {
        &self.message
    }

    pub const fn get_mut(&mut self) -> &mut T {
        &mut self.message
    }

    pub fn into_inner(self) -> T {
        self.message
    }

    pub fn into_parts(self) -> (CallContext, T) {
        (self.context, self.message)
    }
}
