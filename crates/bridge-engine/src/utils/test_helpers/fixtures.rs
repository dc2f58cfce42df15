pub const NETWORK: &str = "Test SDF Network ; September 2015";

pub const ALICE: &str = "GDK36SR7ZTTRPMBYRPGCOSPLYFEK3GLJWI7UL3Q3MBP5LB3YK5VMI6ET";
pub const ALICE_SEED: &str = "SAV5QBWJP4HABLY2D7BTFD5HMOUSNFZDZDNY7LCPSOXXDWYYNVXJAO6K";

pub const BOB: &str = "GDWMDNMHE7Z7CKZRSSEBVHWLTXQLFDHHWIDSGDMOSMH6DPHHLYSWZ7H4";
pub const BOB_SEED: &str = "SCA3MN6Y7TJMNWTDLHTJMMITUELQ3Z4V4S3SLOCNDYFUZ7M6YWGOSAND";

pub const CAROL: &str = "GATLDRZIJG4TZJJWMTFIEQDEHRIUYRY4UCSKIJHCJTZMZSAKHGJT4LTJ";
pub const CAROL_SEED: &str = "SBGCNWIHJQT5RHW6LETQYCWBJNY6A4NRKI4VDH3VI5FS6O5GGSA7KUMS";

pub const ISSUER: &str = "GC457CLNAUSJLWOHGRUD3VLBXKGOM3JJKKGMXPRJNR6BAJB5K3PXYX3Z";
pub const ISSUER_SEED: &str = "SBJVY34OWUI7LWLGUGYHEXPZF27SOUKPVOUULS55NGHCHLDSYQLVPHCB";

// Account paying out of the bridge
pub const BASE: &str = "GBQ7QDO3NZDP6KPYBQMXDF4CK3KWZXGZPMHXQXLAMIE277DBUQTABGIH";
pub const BASE_SEED: &str = "SDFOMYQXF7KFBOYM24IKO2IHTQC37ROY4NPPUZLW5XD5AN327XKKEAU3";

// Account allowed to authorize trust lines
pub const AUTHORIZING: &str = "GCOIRUG3H25A5JPFH6ERVJ7JZGLHYVJ5KOJDK4MUI4DJQRYTU5S734NM";
pub const AUTHORIZING_SEED: &str = "SCCQFCY2KKMGJVFFLMABSQNNK5BOILS7TJJM5KRALYHILXG5UOVUR4I4";
