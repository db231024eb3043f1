use crate::{controller::Controller, error::EngineError};

/// Stable handle to a registered controller. Never reused after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CardId(usize);

impl CardId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for CardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "card {}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct ControllerRegistry {
    cards: Vec<Option<Controller>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, controller: Controller) -> CardId {
        self.cards.push(Some(controller));
        CardId(self.cards.len() - 1)
    }

    pub fn get(&self, id: CardId) -> Result<&Controller, EngineError> {
        self.cards
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(EngineError::UnknownCard(id.0))
    }

    pub fn get_mut(&mut self, id: CardId) -> Result<&mut Controller, EngineError> {
        self.cards
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(EngineError::UnknownCard(id.0))
    }

    /// Looks up a card by raw index, as it arrives from outside callers.
    pub fn id(&self, index: usize) -> Result<CardId, EngineError> {
        let id = CardId(index);
        self.get(id).map(|_| id)
    }

    pub fn find(&self, name: &str) -> Option<CardId> {
        self.iter()
            .find(|(_, controller)| controller.name() == name)
            .map(|(id, _)| id)
    }

    pub fn remove(&mut self, id: CardId) -> Option<Controller> {
        self.cards.get_mut(id.0).and_then(Option::take)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CardId, &Controller)> {
        self.cards
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|controller| (CardId(index), controller)))
    }

    pub fn len(&self) -> usize {
        self.cards.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&mut self) {
        for controller in self.cards.iter_mut().flatten() {
            controller.shutdown();
        }
    }
}
