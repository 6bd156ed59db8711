//! Thread-safe document handles for editor bindings.

use crate::error::Result;
use parking_lot::Mutex;
use skein_db::{Document, Subscription, TextRef};
use std::sync::Arc;

/// A document shared between the sync task and the host application.
///
/// Every mutation goes through the mutex, so local edits and remote updates
/// are serialized.
pub type SharedDoc = Arc<Mutex<Document>>;

pub fn shared(doc: Document) -> SharedDoc {
    Arc::new(Mutex::new(doc))
}

/// A collaborative plain text document.
#[derive(Clone)]
pub struct TextDoc {
    doc: SharedDoc,
    text: TextRef,
}

impl TextDoc {
    /// Bind to the text root `name`, declaring it if needed.
    pub fn new(doc: SharedDoc, name: &str) -> Result<Self> {
        let text = doc.lock().get_or_insert_text(name)?;
        Ok(Self { doc, text })
    }

    pub fn doc(&self) -> &SharedDoc {
        &self.doc
    }

    /// Insert text at position.
    pub fn insert(&self, position: usize, text: &str) -> Result<()> {
        let mut doc = self.doc.lock();
        let mut txn = doc.transact();
        self.text.insert(&mut txn, position, text)?;
        txn.commit();
        Ok(())
    }

    /// Delete text at position.
    pub fn delete(&self, position: usize, length: usize) -> Result<()> {
        let mut doc = self.doc.lock();
        let mut txn = doc.transact();
        self.text.remove_range(&mut txn, position, length)?;
        txn.commit();
        Ok(())
    }

    /// Get the current text content.
    pub fn get_text(&self) -> String {
        self.text.get_string(&*self.doc.lock())
    }

    pub fn len(&self) -> usize {
        self.text.len(&*self.doc.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Transaction events for the whole document.
    pub fn subscribe(&self) -> Subscription {
        self.doc.lock().subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_db::{Chunk, Delta};

    #[test]
    fn test_text_doc_edits() {
        let doc = TextDoc::new(shared(Document::with_client_id(1)), "notes").unwrap();
        doc.insert(0, "Hello World").unwrap();
        doc.delete(5, 6).unwrap();
        doc.insert(5, "!").unwrap();
        assert_eq!(doc.get_text(), "Hello!");
        assert_eq!(doc.len(), 6);
        assert!(doc.insert(99, "x").is_err());
    }

    #[test]
    fn test_text_doc_events() {
        let doc = TextDoc::new(shared(Document::with_client_id(1)), "notes").unwrap();
        let mut events = doc.subscribe();
        doc.insert(0, "ab").unwrap();

        let event = events.try_recv().unwrap();
        let change = event.change_for("notes").unwrap();
        assert_eq!(change.delta, vec![Delta::Insert(Chunk::Text("ab".into()))]);
    }

    #[test]
    fn test_type_mismatch() {
        let doc = shared(Document::with_client_id(1));
        doc.lock().get_or_insert_map("notes").unwrap();
        assert!(TextDoc::new(doc, "notes").is_err());
    }
}
