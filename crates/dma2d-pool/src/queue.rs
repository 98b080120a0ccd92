use crate::hal::Dma2dHal;
use crate::transaction::TransactionNode;

/// Intrusive FIFO of transactions waiting for channels.
///
/// Links live in the nodes themselves. Only accessed under the group lock.
pub(crate) struct PendingQueue<H: Dma2dHal> {
    head: Option<&'static TransactionNode<H>>,
    tail: Option<&'static TransactionNode<H>>,
}

impl<H: Dma2dHal> PendingQueue<H> {
    pub(crate) const fn new() -> Self {
        Self { head: None, tail: None }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn front(&self) -> Option<&'static TransactionNode<H>> {
        self.head
    }

    pub(crate) fn push_back(&mut self, node: &'static TransactionNode<H>) {
        node.set_next(None);
        match self.tail {
            Some(tail) => tail.set_next(Some(node)),
            None => self.head = Some(node),
        }
        self.tail = Some(node);
    }

    pub(crate) fn push_front(&mut self, node: &'static TransactionNode<H>) {
        node.set_next(self.head);
        if self.tail.is_none() {
            self.tail = Some(node);
        }
        self.head = Some(node);
    }

    pub(crate) fn pop_front(&mut self) -> Option<&'static TransactionNode<H>> {
        let node = self.head?;
        self.head = node.next();
        node.set_next(None);
        if self.head.is_none() {
            self.tail = None;
        }
        Some(node)
    }

    pub(crate) fn len(&self) -> usize {
        let mut len = 0;
        let mut cursor = self.head;
        while let Some(node) = cursor {
            len += 1;
            cursor = node.next();
        }
        len
    }
}
