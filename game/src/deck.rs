//! A single-use deck of playing cards.
use rand::Rng;
use snafu::{ensure, Snafu};

use crate::model::{Card, Hand, Rank, Suit};

/// The number of cards in a full deck.
pub const DECK_SIZE: usize = 52;

/// The number of cards dealt to each player.
pub const HAND_SIZE: usize = 2;

#[derive(Debug, Snafu, Eq, PartialEq)]
pub enum Error {
    #[snafu(display(
        "cannot deal {} cards from a deck of {}",
        requested,
        remaining
    ))]
    InsufficientCards { requested: usize, remaining: usize },
}

/// The pool of cards not yet dealt.
///
/// A deck belongs to exactly one dealing operation; cards leave the pool as
/// they are dealt and never come back.
#[derive(Debug, Clone)]
pub struct Deck {
    cards: Vec<Card>,
}

impl Deck {
    /// Create a full deck, in suit-major order.
    pub fn new() -> Self {
        let mut cards = Vec::with_capacity(DECK_SIZE);
        for &suit in Suit::ALL.iter() {
            for &rank in Rank::ALL.iter() {
                cards.push(Card::new(rank, suit));
            }
        }
        Deck { cards }
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// The cards still in the pool.
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Deal `n` two-card hands.
    ///
    /// Every card is picked uniformly at random from what remains in the pool,
    /// and removed from the pool before the next pick. If the pool cannot
    /// cover all `n` hands, nothing is dealt and the deck is left untouched.
    pub fn deal_hands<R>(&mut self, n: usize, rng: &mut R) -> Result<Vec<Hand>, Error>
    where
        R: Rng,
    {
        let requested = n.saturating_mul(HAND_SIZE);
        ensure!(
            requested <= self.cards.len(),
            InsufficientCardsSnafu {
                requested,
                remaining: self.cards.len(),
            }
        );
        let mut hands = Vec::with_capacity(n);
        for _ in 0..n {
            let first = self.draw(rng);
            let second = self.draw(rng);
            hands.push(Hand([first, second]));
        }
        Ok(hands)
    }

    // Callers must have checked that the pool is non-empty.
    fn draw<R>(&mut self, rng: &mut R) -> Card
    where
        R: Rng,
    {
        let position = rng.gen_range(0..self.cards.len());
        self.cards.swap_remove(position)
    }
}

impl Default for Deck {
    fn default() -> Self {
        Deck::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn new_deck_has_every_card_once() {
        let deck = Deck::new();
        assert_eq!(deck.len(), DECK_SIZE);
        let distinct: HashSet<Card> = deck.cards().iter().copied().collect();
        assert_eq!(distinct.len(), DECK_SIZE);
        for &suit in Suit::ALL.iter() {
            let count = deck.cards().iter().filter(|c| c.suit == suit).count();
            assert_eq!(count, 13, "suit {:?}", suit);
        }
        for &rank in Rank::ALL.iter() {
            let count = deck.cards().iter().filter(|c| c.rank == rank).count();
            assert_eq!(count, 4, "rank {:?}", rank);
        }
    }

    #[test]
    fn dealt_hands_are_disjoint_from_each_other_and_the_pool() {
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut deck = Deck::new();
            let hands = deck.deal_hands(9, &mut rng).expect("enough cards");
            assert_eq!(hands.len(), 9);

            let dealt: Vec<Card> = hands.iter().flat_map(|h| h.cards().iter().copied()).collect();
            assert_eq!(dealt.len(), 18);
            let dealt_set: HashSet<Card> = dealt.iter().copied().collect();
            assert_eq!(dealt_set.len(), 18, "a card was dealt twice");

            assert_eq!(deck.len(), DECK_SIZE - 18);
            assert!(deck.cards().iter().all(|c| !dealt_set.contains(c)));
        }
    }

    #[test]
    fn the_whole_deck_can_be_dealt() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut deck = Deck::new();
        let hands = deck.deal_hands(26, &mut rng).expect("exactly enough cards");
        assert!(deck.is_empty());
        let dealt: HashSet<Card> = hands.iter().flat_map(|h| h.cards().iter().copied()).collect();
        assert_eq!(dealt.len(), DECK_SIZE);
    }

    #[test]
    fn insufficient_cards_leaves_deck_untouched() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut deck = Deck::new();
        deck.deal_hands(20, &mut rng).expect("enough cards");
        let before = deck.cards().to_vec();

        let err = deck.deal_hands(7, &mut rng).unwrap_err();
        assert_eq!(
            err,
            Error::InsufficientCards {
                requested: 14,
                remaining: 12
            }
        );
        assert_eq!(deck.cards(), &before[..]);
    }

    #[test]
    fn zero_hands_is_fine() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut deck = Deck::new();
        assert!(deck.deal_hands(0, &mut rng).expect("no cards needed").is_empty());
        assert_eq!(deck.len(), DECK_SIZE);
    }

    #[test]
    fn card_display() {
        assert_eq!(Card::new(Rank::Ace, Suit::Spades).to_string(), "As");
        assert_eq!(Card::new(Rank::Ten, Suit::Diamonds).to_string(), "Td");
        assert_eq!(Card::new(Rank::Seven, Suit::Clubs).to_string(), "7c");
    }
}
