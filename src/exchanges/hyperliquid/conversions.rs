use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::core::errors::TradeError;
use crate::core::types::{PerpMarket, PortfolioSummary, SpotMarket};

/// Spot rows kept after sorting by day volume.
pub const SPOT_MARKET_LIMIT: usize = 20;

const USDC_TOKEN_INDEX: u64 = 0;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const MAX_PRICE_DECIMALS: u32 = 10;

// L1 token names the app shows under a different ticker.
const DISPLAY_OVERRIDES: &[(&str, &str)] = &[
    ("UBTC", "BTC"),
    ("UETH", "ETH"),
    ("USOL", "SOL"),
    ("UPUMP", "PUMP"),
    ("UBONK", "BONK"),
    ("UMON", "MON"),
    ("MON", "MONPRO"),
    ("UFART", "FARTCOIN"),
    ("UXPL", "XPL"),
    ("UENA", "ENA"),
    ("HPENGU", "PENGU"),
    ("UDZ", "2Z"),
    ("MMOVE", "MOVE"),
    ("USDT0", "USDT"),
    ("XAUT0", "XAUT"),
    ("LINK0", "LINK"),
    ("TRX0", "TRX"),
    ("AAVE0", "AAVE"),
    ("AVAX0", "AVAX"),
    ("PEPE0", "PEPE"),
    ("BNB1", "BNB"),
    ("XMR1", "XMR"),
];

const UNIT_TOKENS: &[(&str, &str)] = &[
    ("Bitcoin", "BTC"),
    ("Ethereum", "ETH"),
    ("Solana", "SOL"),
    ("Pump Fun", "PUMP"),
    ("Bonk", "BONK"),
];

const PORTFOLIO_VALUE_KEYS: [&str; 4] = ["accountValue", "totalValue", "equity", "totalEquity"];

fn mids_object(root: &Value) -> Option<&Map<String, Value>> {
    if let Some(mids) = root.pointer("/data/mids").and_then(Value::as_object) {
        return Some(mids);
    }
    if let Some(mids) = root.get("mids").and_then(Value::as_object) {
        return Some(mids);
    }
    root.as_object()
}

fn decimal_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Parse mid prices from a bare `{coin: px}` object, a `{"mids": {...}}`
/// object, or the WS-wrapped `{"channel":"allMids","data":{"mids":{...}}}`.
/// Entries whose price does not parse are skipped.
pub fn parse_all_mids(json: &str) -> Result<BTreeMap<String, Decimal>, TradeError> {
    let root: Value = serde_json::from_str(json)?;
    let mids = mids_object(&root)
        .ok_or_else(|| TradeError::ProtocolError("allMids payload is not an object".to_string()))?;
    Ok(mids
        .iter()
        .filter_map(|(coin, px)| decimal_of(px).map(|px| (coin.clone(), px)))
        .collect())
}

/// Mid price of one coin, if present.
pub fn mid_price(json: &str, coin: &str) -> Result<Option<Decimal>, TradeError> {
    Ok(parse_all_mids(json)?.get(coin).copied())
}

fn find_balances(value: &Value) -> Option<&Vec<Value>> {
    find_key(value, "balances", 4).and_then(Value::as_array)
}

/// Total balance of `coin` in a spot clearinghouse payload, wherever the
/// `balances` array sits (bare REST reply or a WS post response).
pub fn spot_balance(json: &str, coin: &str) -> Result<Option<Decimal>, TradeError> {
    let root: Value = serde_json::from_str(json)?;
    let balances = find_balances(&root)
        .ok_or_else(|| TradeError::ProtocolError("spot state has no balances".to_string()))?;
    Ok(balances
        .iter()
        .find(|b| b.get("coin").and_then(Value::as_str) == Some(coin))
        .and_then(|b| b.get("total"))
        .and_then(decimal_of))
}

pub fn spot_usdc_balance(json: &str) -> Result<Option<Decimal>, TradeError> {
    spot_balance(json, "USDC")
}

/// Every `{coin, total}` row of a spot clearinghouse payload.
pub fn spot_balances(json: &str) -> Result<BTreeMap<String, Decimal>, TradeError> {
    let root: Value = serde_json::from_str(json)?;
    let balances = find_balances(&root)
        .ok_or_else(|| TradeError::ProtocolError("spot state has no balances".to_string()))?;
    Ok(balances
        .iter()
        .filter_map(|b| {
            let coin = b.get("coin").and_then(Value::as_str)?;
            let total = b.get("total").and_then(decimal_of)?;
            Some((coin.to_string(), total))
        })
        .collect())
}

fn find_key<'a>(value: &'a Value, key: &str, depth: u8) -> Option<&'a Value> {
    if let Some(found) = value.get(key) {
        return Some(found);
    }
    if depth == 0 {
        return None;
    }
    value
        .as_object()?
        .values()
        .find_map(|child| find_key(child, key, depth - 1))
}

/// Perp `accountValue`, preferring `marginSummary` over the cross summary.
pub fn perp_account_value(json: &str) -> Result<Option<Decimal>, TradeError> {
    let root: Value = serde_json::from_str(json)?;
    if let Some(v) = root.pointer("/marginSummary/accountValue").and_then(decimal_of) {
        return Ok(Some(v));
    }
    Ok(find_key(&root, "accountValue", 4).and_then(decimal_of))
}

/// The perp clearinghouse object embedded in a `webData2`/`webData3` push,
/// re-serialized so it parses like a `clearinghouseState` reply.
pub fn web_data_clearinghouse_state(json: &str) -> Result<Option<String>, TradeError> {
    let root: Value = serde_json::from_str(json)?;
    Ok(root
        .get("clearinghouseState")
        .or_else(|| root.pointer("/perpDexStates/0/clearinghouseState"))
        .filter(|state| state.is_object())
        .map(Value::to_string))
}

/// Perp listings from `allPerpMetas` (one meta per dex) or a single `meta`
/// reply. Delisted coins are dropped.
pub fn perp_markets(json: &str) -> Result<Vec<PerpMarket>, TradeError> {
    let root: Value = serde_json::from_str(json)?;
    let metas: Vec<&Value> = match &root {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![&root],
        _ => return Err(TradeError::ProtocolError("perp meta is not an object or array".to_string())),
    };
    let markets: Vec<PerpMarket> = metas
        .into_iter()
        .filter_map(|meta| meta.get("universe").and_then(Value::as_array))
        .flatten()
        .filter(|asset| !asset.get("isDelisted").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|asset| {
            Some(PerpMarket {
                name: asset.get("name")?.as_str()?.to_string(),
                sz_decimals: uint_of(asset.get("szDecimals")).unwrap_or(0),
                max_leverage: uint_of(asset.get("maxLeverage")).unwrap_or(1),
            })
        })
        .collect();
    if markets.is_empty() {
        return Err(TradeError::ProtocolError("perp meta lists no markets".to_string()));
    }
    Ok(markets)
}

fn uint_of(value: Option<&Value>) -> Option<u32> {
    value.and_then(Value::as_u64).and_then(|v| u32::try_from(v).ok())
}

/// Decimal places a price string is quoted with, ignoring trailing zeros.
fn quoted_decimals(px: &str) -> u32 {
    let Some((_, frac)) = px.split_once('.') else {
        return 0;
    };
    let shown = frac.trim_end_matches('0').len();
    u32::try_from(shown).unwrap_or(MAX_PRICE_DECIMALS).min(MAX_PRICE_DECIMALS)
}

/// `$TICKER` inside a full name, trailing digits dropped.
fn dollar_ticker(full_name: &str) -> Option<String> {
    full_name.split('$').skip(1).find_map(|rest| {
        let ticker: String = rest
            .chars()
            .take_while(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            .collect();
        let ticker = ticker.trim_end_matches(|c: char| c.is_ascii_digit());
        (!ticker.is_empty()).then(|| ticker.to_string())
    })
}

/// First run of three or more capitals in a full name, trailing digits dropped.
fn caps_ticker(full_name: &str) -> Option<String> {
    full_name
        .split(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit()))
        .filter(|run| run.len() >= 3)
        .map(|run| run.trim_end_matches(|c: char| c.is_ascii_digit()))
        .find(|run| run.len() >= 3)
        .map(str::to_string)
}

/// Ticker shown for a spot token, given its L1 `name` and `fullName`.
pub fn display_symbol(name: &str, full_name: &str) -> String {
    if let Some((_, shown)) = DISPLAY_OVERRIDES.iter().find(|(token, _)| *token == name) {
        return shown.to_string();
    }
    if full_name.is_empty() {
        return name.to_string();
    }
    if let Some(base) = full_name.strip_prefix("Unit ") {
        if let Some((_, shown)) = UNIT_TOKENS.iter().find(|(long, _)| *long == base) {
            return shown.to_string();
        }
    }
    dollar_ticker(full_name)
        .or_else(|| caps_ticker(full_name))
        .unwrap_or_else(|| name.to_string())
}

/// USDC-quoted spot pairs from a `spotMetaAndAssetCtxs` reply
/// (`[{tokens, universe}, [ctx, ...]]`), busiest first and capped at
/// `SPOT_MARKET_LIMIT`.
pub fn spot_markets(json: &str) -> Result<Vec<SpotMarket>, TradeError> {
    let root: Value = serde_json::from_str(json)?;
    let malformed = || TradeError::ProtocolError("spotMetaAndAssetCtxs has an unexpected shape".to_string());
    let meta = root.get(0).filter(|m| m.is_object()).ok_or_else(malformed)?;
    let ctxs = root.get(1).and_then(Value::as_array).ok_or_else(malformed)?;
    let tokens = meta.get("tokens").and_then(Value::as_array).ok_or_else(malformed)?;
    let universe = meta.get("universe").and_then(Value::as_array).ok_or_else(malformed)?;

    let ctx_by_coin: BTreeMap<&str, &Value> = ctxs
        .iter()
        .filter_map(|ctx| Some((ctx.get("coin")?.as_str()?, ctx)))
        .filter(|(coin, _)| !coin.is_empty())
        .collect();

    let mut markets: Vec<SpotMarket> = universe
        .iter()
        .filter_map(|pair| spot_market(pair, tokens, &ctx_by_coin))
        .collect();
    if markets.is_empty() {
        return Err(TradeError::ProtocolError("spot meta lists no USDC pairs".to_string()));
    }
    markets.sort_by(|a, b| {
        b.day_ntl_vlm
            .cmp(&a.day_ntl_vlm)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    markets.truncate(SPOT_MARKET_LIMIT);
    Ok(markets)
}

fn spot_market(pair: &Value, tokens: &[Value], ctx_by_coin: &BTreeMap<&str, &Value>) -> Option<SpotMarket> {
    let name = pair.get("name")?.as_str().filter(|n| !n.is_empty())?;
    let pair_tokens = pair.get("tokens")?.as_array()?;
    if pair_tokens.get(1)?.as_u64()? != USDC_TOKEN_INDEX {
        return None;
    }
    let index = pair.get("index")?.as_u64()?;
    let canonical = pair.get("isCanonical").and_then(Value::as_bool).unwrap_or(false);

    let base = name.split_once('/').map_or(name, |(base, _)| base);
    let price_key = if canonical {
        base.to_string()
    } else {
        format!("@{}", index)
    };

    let base_token = pair_tokens
        .first()
        .and_then(Value::as_u64)
        .and_then(|i| tokens.get(usize::try_from(i).ok()?));
    let token_name = base_token
        .and_then(|t| t.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let full_name = base_token
        .and_then(|t| t.get("fullName"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let symbol = if token_name.is_empty() {
        base.to_string()
    } else {
        display_symbol(token_name, full_name)
    };
    let fallback_decimals = uint_of(base_token.and_then(|t| t.get("szDecimals"))).unwrap_or(2);

    let alt_key = format!("@{}", index);
    let ctx = [price_key.as_str(), alt_key.as_str(), name]
        .iter()
        .find_map(|key| ctx_by_coin.get(key).copied());
    let field = |key: &str| ctx.and_then(|c| c.get(key)).and_then(decimal_of);
    let mid_str = ctx.and_then(|c| c.get("midPx")).map(|px| match px {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });

    Some(SpotMarket {
        symbol,
        price_key,
        mid_px: field("midPx"),
        prev_day_px: field("prevDayPx"),
        day_ntl_vlm: field("dayNtlVlm").unwrap_or_default(),
        day_base_vlm: field("dayBaseVlm").unwrap_or_default(),
        price_decimals: mid_str
            .filter(|s| !s.is_empty() && s != "null")
            .map_or(fallback_decimals, |s| quoted_decimals(&s)),
    })
}

/// The per-window object of a `portfolio` reply. The venue answers
/// `[["day", {...}], ["week", {...}], ...]`; a bare pair or object is also
/// accepted.
fn portfolio_window(root: &Value) -> Option<&Value> {
    if root.is_object() {
        return Some(root);
    }
    let rows = root.as_array()?;
    if let Some(window) = rows.first().and_then(|row| row.get(1)).filter(|w| w.is_object()) {
        return Some(window);
    }
    rows.get(1).filter(|w| w.is_object())
}

/// `[[ts, "v"], ...]` rows that parse. Timestamps may be numbers or strings.
fn history_points(window: &Value, key: &str) -> Vec<(i64, Decimal)> {
    window
        .get(key)
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let ts = match row.get(0)? {
                        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
                        Value::String(s) => s.parse().ok()?,
                        _ => return None,
                    };
                    Some((ts, decimal_of(row.get(1)?)?))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Change between the last point and the latest point at least 24h older
/// than `now_ms`, or the first point when none is that old.
fn pnl_over_day(points: &[(i64, Decimal)], now_ms: i64) -> Option<Decimal> {
    if points.len() < 2 {
        return None;
    }
    let (_, last) = points.last()?;
    let target = now_ms - DAY_MS;
    let base = points
        .iter()
        .filter(|(ts, _)| *ts <= target)
        .max_by_key(|(ts, _)| *ts)
        .or_else(|| points.first())
        .map(|(_, v)| *v)?;
    Some(*last - base)
}

/// Total account value and 24h pnl from a `portfolio` reply.
pub fn portfolio_summary(json: &str, now_ms: i64) -> Result<PortfolioSummary, TradeError> {
    let root: Value = serde_json::from_str(json)?;
    let window = portfolio_window(&root)
        .ok_or_else(|| TradeError::ProtocolError("portfolio has an unexpected shape".to_string()))?;

    let total_value = PORTFOLIO_VALUE_KEYS
        .iter()
        .find_map(|key| window.get(*key).and_then(decimal_of))
        .or_else(|| {
            history_points(window, "accountValueHistory")
                .last()
                .map(|(_, v)| *v)
        })
        .ok_or_else(|| TradeError::ProtocolError("portfolio has no account value".to_string()))?;

    let pnl_24h = pnl_over_day(&history_points(window, "pnlHistory"), now_ms);
    let pnl_24h_pct = pnl_24h
        .filter(|_| !total_value.is_zero())
        .and_then(|pnl| pnl.checked_div(total_value))
        .map(|ratio| (ratio * Decimal::ONE_HUNDRED).round_dp(4));

    Ok(PortfolioSummary {
        total_value,
        pnl_24h,
        pnl_24h_pct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_mids_shapes() {
        let bare = parse_all_mids(r#"{"BTC":"64000.5","ETH":"3100.25","@1":"bad"}"#).unwrap();
        assert_eq!(bare.len(), 2);
        assert_eq!(bare["ETH"], Decimal::new(310_025, 2));

        let wrapped =
            parse_all_mids(r#"{"channel":"allMids","data":{"mids":{"SOL":"150.1"}}}"#).unwrap();
        assert_eq!(wrapped["SOL"], Decimal::new(1501, 1));

        assert!(parse_all_mids("[1,2]").is_err());
        assert!(parse_all_mids("not json").is_err());
    }

    #[test]
    fn test_mid_price_lookup() {
        let json = r#"{"BTC":"64000"}"#;
        assert_eq!(mid_price(json, "BTC").unwrap(), Some(Decimal::from(64_000)));
        assert_eq!(mid_price(json, "DOGE").unwrap(), None);
    }

    #[test]
    fn test_spot_usdc_from_rest_and_ws_shapes() {
        let rest = r#"{"balances":[{"coin":"USDC","token":0,"hold":"0.0","total":"42.125"}]}"#;
        assert_eq!(spot_usdc_balance(rest).unwrap(), Some(Decimal::new(42_125, 3)));

        let ws = r#"{"id":3,"response":{"type":"info","payload":{"type":"spotClearinghouseState",
            "data":{"balances":[{"coin":"HYPE","total":"1"},{"coin":"USDC","total":"7"}]}}}}"#;
        assert_eq!(spot_usdc_balance(ws).unwrap(), Some(Decimal::from(7)));

        let no_usdc = r#"{"balances":[]}"#;
        assert_eq!(spot_usdc_balance(no_usdc).unwrap(), None);
        assert!(spot_usdc_balance(r#"{"other":1}"#).is_err());
    }

    #[test]
    fn test_spot_balances_skip_malformed_rows() {
        let json = r#"{"balances":[{"coin":"USDC","total":"5"},{"coin":"X"},{"total":"1"}]}"#;
        let balances = spot_balances(json).unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances["USDC"], Decimal::from(5));
    }

    #[test]
    fn test_perp_account_value() {
        let json = r#"{"marginSummary":{"accountValue":"101.5","totalNtlPos":"0"},
            "crossMarginSummary":{"accountValue":"99"},"withdrawable":"100"}"#;
        assert_eq!(perp_account_value(json).unwrap(), Some(Decimal::new(1015, 1)));
        let nested = r#"{"clearinghouseState":{"crossMarginSummary":{"accountValue":"3"}}}"#;
        assert_eq!(perp_account_value(nested).unwrap(), Some(Decimal::from(3)));
        assert_eq!(perp_account_value("{}").unwrap(), None);
    }

    #[test]
    fn test_clearinghouse_state_from_web_data() {
        let legacy = r#"{"clearinghouseState":{"marginSummary":{"accountValue":"9"}},"openOrders":[]}"#;
        let state = web_data_clearinghouse_state(legacy).unwrap().unwrap();
        assert_eq!(perp_account_value(&state).unwrap(), Some(Decimal::from(9)));

        let per_dex = r#"{"user":"0x1","perpDexStates":[{"clearinghouseState":
            {"crossMarginSummary":{"accountValue":"1"},"marginSummary":{"accountValue":"4.5"}}}]}"#;
        let state = web_data_clearinghouse_state(per_dex).unwrap().unwrap();
        assert_eq!(perp_account_value(&state).unwrap(), Some(Decimal::new(45, 1)));

        assert_eq!(web_data_clearinghouse_state(r#"{"user":"0x1"}"#).unwrap(), None);
    }

    #[test]
    fn test_perp_markets_skip_delisted() {
        let json = r#"[{"universe":[{"name":"BTC","szDecimals":5,"maxLeverage":40},
            {"name":"OLD","szDecimals":1,"maxLeverage":3,"isDelisted":true}]},
            {"universe":[{"name":"xyz:GOLD","szDecimals":2,"maxLeverage":10}]}]"#;
        let markets = perp_markets(json).unwrap();
        let names: Vec<&str> = markets.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["BTC", "xyz:GOLD"]);
        assert_eq!(markets[0].sz_decimals, 5);
        assert_eq!(markets[0].max_leverage, 40);

        let single = perp_markets(r#"{"universe":[{"name":"ETH","szDecimals":4,"maxLeverage":25}]}"#).unwrap();
        assert_eq!(single[0].name, "ETH");
        assert!(perp_markets("[]").is_err());
    }

    #[test]
    fn test_display_symbol_rules() {
        assert_eq!(display_symbol("UBTC", ""), "BTC");
        assert_eq!(display_symbol("XYZ", "Unit Solana"), "SOL");
        assert_eq!(display_symbol("PEPE9", "Wrapped $PEPE0 token"), "PEPE");
        assert_eq!(display_symbol("LINK7", "Chainlink powered LINK bridge"), "LINK");
        assert_eq!(display_symbol("HFUN", "fun token"), "HFUN");
    }

    #[test]
    fn test_spot_markets_keep_usdc_pairs_by_volume() {
        let json = r#"[
            {"tokens":[
                {"name":"USDC","index":0,"szDecimals":8},
                {"name":"PURR","index":1,"szDecimals":0},
                {"name":"UBTC","index":2,"szDecimals":5,"fullName":"Unit Bitcoin"},
                {"name":"HFUN","index":3,"szDecimals":2}],
             "universe":[
                {"name":"PURR/USDC","tokens":[1,0],"index":0,"isCanonical":true},
                {"name":"@142","tokens":[2,0],"index":142,"isCanonical":false},
                {"name":"@2","tokens":[3,0],"index":2,"isCanonical":false},
                {"name":"@9","tokens":[3,1],"index":9,"isCanonical":false}]},
            [{"coin":"PURR/USDC","dayNtlVlm":"1000","dayBaseVlm":"5000","midPx":"0.1850","prevDayPx":"0.18"},
             {"coin":"@142","dayNtlVlm":"90000","midPx":"64000.0"},
             {"coin":"@2","dayNtlVlm":"1000","midPx":null},
             {"coin":"@9","dayNtlVlm":"999999","midPx":"1"}]
        ]"#;
        let markets = spot_markets(json).unwrap();
        let rows: Vec<(&str, &str)> = markets
            .iter()
            .map(|m| (m.symbol.as_str(), m.price_key.as_str()))
            .collect();
        assert_eq!(rows, vec![("BTC", "@142"), ("HFUN", "@2"), ("PURR", "PURR")]);

        assert_eq!(markets[0].price_decimals, 0);
        assert_eq!(markets[1].price_decimals, 2);
        assert_eq!(markets[1].mid_px, None);
        assert_eq!(markets[2].price_decimals, 3);
        assert_eq!(markets[2].prev_day_px, Some(Decimal::new(18, 2)));
        assert_eq!(markets[2].day_base_vlm, Decimal::from(5000));

        assert!(spot_markets(r#"{"tokens":[]}"#).is_err());
    }

    #[test]
    fn test_spot_markets_capped() {
        let tokens: Vec<Value> = (0..=25)
            .map(|i| serde_json::json!({"name": format!("T{}", i), "szDecimals": 2}))
            .collect();
        let universe: Vec<Value> = (1..=25)
            .map(|i| serde_json::json!({"name": format!("@{}", i), "tokens": [i, 0], "index": i}))
            .collect();
        let ctxs: Vec<Value> = (1..=25)
            .map(|i| serde_json::json!({"coin": format!("@{}", i), "dayNtlVlm": i.to_string()}))
            .collect();
        let json = serde_json::json!([{"tokens": tokens, "universe": universe}, ctxs]).to_string();

        let markets = spot_markets(&json).unwrap();
        assert_eq!(markets.len(), SPOT_MARKET_LIMIT);
        assert_eq!(markets[0].price_key, "@25");
        assert_eq!(markets[SPOT_MARKET_LIMIT - 1].price_key, "@6");
    }

    #[test]
    fn test_portfolio_day_pnl() {
        let now = 200_000_000;
        let json = r#"[["day",{"accountValueHistory":[[0,"240"],[199000000,"250"]],
            "pnlHistory":[[0,"0"],[100000000,"5"],["113600000","7"],[199000000,"12"]]}],
            ["week",{"accountValueHistory":[[0,"1"]],"pnlHistory":[]}]]"#;
        let summary = portfolio_summary(json, now).unwrap();
        assert_eq!(summary.total_value, Decimal::from(250));
        assert_eq!(summary.pnl_24h, Some(Decimal::from(5)));
        assert_eq!(summary.pnl_24h_pct, Some(Decimal::from(2)));

        // Nothing a full day old: measured from the first point.
        let young = r#"{"accountValue":"10","pnlHistory":[[150000000,"1"],[190000000,"-1"]]}"#;
        let summary = portfolio_summary(young, now).unwrap();
        assert_eq!(summary.pnl_24h, Some(Decimal::from(-2)));
        assert_eq!(summary.pnl_24h_pct, Some(Decimal::from(-20)));
    }

    #[test]
    fn test_portfolio_partial_data() {
        let one_point = r#"["day",{"totalEquity":"0","pnlHistory":[[1,"3"]]}]"#;
        let summary = portfolio_summary(one_point, 0).unwrap();
        assert_eq!(summary.total_value, Decimal::ZERO);
        assert_eq!(summary.pnl_24h, None);
        assert_eq!(summary.pnl_24h_pct, None);

        let zero_total = r#"{"equity":"0","pnlHistory":[[1,"3"],[2,"4"]]}"#;
        assert_eq!(portfolio_summary(zero_total, 0).unwrap().pnl_24h_pct, None);

        assert!(portfolio_summary(r#"{"pnlHistory":[]}"#, 0).is_err());
        assert!(portfolio_summary("[1]", 0).is_err());
    }
}
